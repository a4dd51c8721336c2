//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use campusbot_core::{CampusBot, Resolved};
use campusbot_shared::{
    AppConfig, Entity, EntityKind, RequestContext, init_config, load_config, load_config_from,
};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::metrics;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// CampusBot: campus directory and course lookups backed by a local cache.
#[derive(Parser)]
#[command(
    name = "campusbot",
    version,
    about = "Look up students, contacts, courses, and syllabi through a self-refreshing local cache.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.campusbot/campusbot.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Deadline for one-shot commands, e.g. "30s" or "2m".
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration, global = true)]
    pub timeout: Duration,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run startup warmup and the refresh/cleanup loops until Ctrl-C. Also
    /// serves `/metrics` when `metrics.listen` is set.
    Serve,

    /// Resolve a term: cache first, then the upstream site.
    Lookup {
        /// student, contact, course, or syllabus.
        kind: EntityKind,
        term: String,
    },

    /// Fetch one entity by primary key.
    Get {
        kind: EntityKind,
        key: String,

        /// For courses, also list program memberships.
        #[arg(long)]
        programs: bool,
    },

    /// Refetch a key or term from the upstream, bypassing the cache.
    Refresh {
        kind: EntityKind,
        key_or_term: String,
    },

    /// Warm the cache once: configured seeds, then one refresh pass.
    Warmup,

    /// Delete rows past the hard TTL.
    Cleanup,

    /// Per-table row counts.
    Stats,

    /// Open another database file, check it, and switch reads to it. The
    /// previous database file is deleted once released.
    Swap {
        path: PathBuf,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Config and tracing setup
// ---------------------------------------------------------------------------

/// Load the config file (explicit path or the default location) and apply
/// environment overrides.
pub(crate) fn load(cli: &Cli) -> Result<AppConfig> {
    match &cli.config {
        Some(path) => {
            let mut config = load_config_from(path)?;
            config.apply_env()?;
            Ok(config)
        }
        None => Ok(load_config()?),
    }
}

/// Initialize tracing based on CLI flags and the configured level.
pub(crate) fn init_tracing(cli: &Cli, config: &AppConfig) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,reqwest=warn,libsql=warn")));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli, mut config: AppConfig) -> Result<()> {
    config.validate()?;

    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        };
    }

    let bot = CampusBot::open(config)
        .await
        .wrap_err("failed to open the cache store")?;

    if let Command::Serve = cli.command {
        return cmd_serve(Arc::new(bot)).await;
    }

    let ctx = RequestContext::background()
        .with_request_id(Uuid::now_v7().to_string())
        .with_timeout(cli.timeout);
    let out = Output { json: cli.json };

    match cli.command {
        Command::Lookup { kind, term } => {
            let resolved = bot.lookup(&ctx, kind, &term).await?;
            out.resolved(&resolved)
        }
        Command::Get {
            kind,
            key,
            programs,
        } => {
            let entity = bot.get_by_key(&ctx, kind, &key).await?;
            out.entities(std::slice::from_ref(&entity))?;
            if programs && kind == EntityKind::Course {
                let memberships = bot.course_programs(&ctx, entity.key()).await?;
                if out.json {
                    println!("{}", serde_json::to_string_pretty(&memberships)?);
                } else {
                    for p in &memberships {
                        println!("  {} ({})", p.program_name, p.course_type.label());
                    }
                }
            }
            Ok(())
        }
        Command::Refresh { kind, key_or_term } => {
            let entities = bot.refresh(&ctx, kind, &key_or_term).await?;
            info!(kind = %kind, refreshed = entities.len(), "refresh complete");
            out.entities(&entities)
        }
        Command::Warmup => {
            let startup = bot.warmup(&ctx).await?;
            let refresh = bot.refresh_expiring(&ctx).await?;
            out.report(&(startup, refresh))
        }
        Command::Cleanup => {
            let report = bot.cleanup_now(&ctx).await?;
            if out.json {
                return out.report(&report);
            }
            for (table, deleted) in &report.deleted {
                println!("  {:<20} {deleted:>8} deleted", table.name());
            }
            println!("  {:<20} {:>8} deleted", "total", report.total());
            Ok(())
        }
        Command::Stats => {
            let stats = bot.stats(&ctx).await?;
            if out.json {
                return out.report(&stats);
            }
            println!();
            println!("  Store:  {}", stats.store.path);
            println!(
                "  TTL:    {}",
                humantime::format_duration(stats.store.cache_ttl)
            );
            println!();
            for t in &stats.store.tables {
                println!("  {:<20} {:>8} rows {:>8} fresh", t.table.name(), t.total, t.fresh);
            }
            println!();
            Ok(())
        }
        Command::Swap { path } => cmd_swap(&bot, &ctx, &path).await,
        Command::Serve | Command::Config { .. } => Ok(()),
    }
}

async fn cmd_serve(bot: Arc<CampusBot>) -> Result<()> {
    let token = CancellationToken::new();
    let scheduler = bot.run_background(token.clone());
    let metrics = match bot.config().metrics.listen_addr()? {
        Some(addr) => Some(tokio::spawn(metrics::serve(
            Arc::clone(&bot),
            addr,
            token.clone(),
        ))),
        None => None,
    };
    info!(
        path = %bot.config().storage.path,
        "serving; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for Ctrl-C")?;
    info!("shutting down");
    token.cancel();
    scheduler
        .await
        .map_err(|e| eyre!("scheduler task failed: {e}"))?;
    if let Some(metrics) = metrics {
        metrics
            .await
            .map_err(|e| eyre!("metrics task failed: {e}"))??;
    }
    Ok(())
}

async fn cmd_swap(bot: &CampusBot, ctx: &RequestContext, path: &Path) -> Result<()> {
    let retire = bot.swap_store(ctx, path).await?;
    println!("Store swapped to: {}", path.display());
    retire
        .await
        .map_err(|e| eyre!("retiring the old store failed: {e}"))?;
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

struct Output {
    json: bool,
}

impl Output {
    fn resolved(&self, resolved: &Resolved) -> Result<()> {
        if self.json {
            #[derive(Serialize)]
            struct Answer<'a> {
                tier: &'static str,
                entities: &'a [Entity],
            }
            return self.report(&Answer {
                tier: resolved.tier.as_str(),
                entities: &resolved.entities,
            });
        }
        println!(
            "{} result(s) from {}",
            resolved.entities.len(),
            resolved.tier.as_str()
        );
        self.entities(&resolved.entities)
    }

    fn entities(&self, entities: &[Entity]) -> Result<()> {
        if self.json {
            return self.report(&entities);
        }
        for entity in entities {
            println!("  {:<12} {}", entity.key(), entity.label());
        }
        Ok(())
    }

    fn report<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
