//! Embedded libSQL cache store for CampusBot.
//!
//! The [`Store`] wraps a local libSQL database holding cached students,
//! contacts, courses, program memberships, syllabi and stickers.
//!
//! **Access rules:**
//! - one writer connection, serialized behind an async mutex (at most one
//!   write transaction in flight)
//! - a bounded pool of reader connections for concurrent reads (in-memory
//!   stores read through the writer, since their database is per-connection)
//! - every operation takes a [`RequestContext`] and returns
//!   [`CampusBotError::Cancelled`] if it fires before the operation finishes
//!
//! Reads of TTL-governed tables only return rows with
//! `cached_at > now - cache_ttl`; expired rows behave as absent.
//!
//! [`HotSwap`] wraps a live store and allows replacing it with one built from
//! a different database file while the process keeps serving reads.

mod contacts;
mod courses;
pub mod hotswap;
mod migrations;
mod pool;
pub mod search;
mod stickers;
mod students;
mod syllabi;
mod ttl;
pub mod writeset;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use campusbot_shared::{
    AppConfig, CampusBotError, MEMORY_STORAGE, RequestContext, Result, SyncMode,
};
use libsql::params::Params;
use libsql::{Connection, Database, Row, Value, params};
use tokio::sync::Mutex;

use crate::pool::{ReadHandle, ReaderPool};

pub use contacts::CONTACT_FUZZY_LIMIT;
pub use courses::{COURSE_FUZZY_LIMIT, RECENT_SEMESTERS};
pub use hotswap::HotSwap;
pub use search::{MAX_TERM_CHARS, escape_like, fuzzy_matches, validate_term};
pub use students::STUDENT_FUZZY_LIMIT;
pub use syllabi::SYLLABUS_FUZZY_LIMIT;
pub use ttl::{CacheTable, StoreStats, TableStats};
pub use writeset::WriteSet;

/// Row cap for indexed substring searches.
pub const SEARCH_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// StoreOptions
// ---------------------------------------------------------------------------

/// Runtime store configuration, merged from the config file and env.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Database file path, or `:memory:`.
    pub path: String,
    /// Hard TTL applied to reads of TTL-governed tables.
    pub cache_ttl: Duration,
    pub busy_timeout: Duration,
    pub max_readers: usize,
    pub synchronous: SyncMode,
}

impl StoreOptions {
    pub fn in_memory() -> Self {
        Self {
            path: MEMORY_STORAGE.into(),
            ..Self::from(&AppConfig::default())
        }
    }

    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            ..Self::from(&AppConfig::default())
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_STORAGE
    }
}

impl From<&AppConfig> for StoreOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            path: config.storage.path.clone(),
            cache_ttl: config.cache.cache_ttl,
            busy_timeout: config.storage.busy_timeout,
            max_readers: config.storage.max_readers,
            synchronous: config.storage.synchronous,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Cache store handle wrapping a libSQL database.
pub struct Store {
    #[allow(dead_code)]
    db: Database,
    options: StoreOptions,
    writer: Mutex<Connection>,
    /// `None` for in-memory stores.
    readers: Option<ReaderPool>,
}

impl Store {
    /// Open or create a store, apply pragmas, and run pending migrations.
    pub async fn open(options: StoreOptions) -> Result<Self> {
        if !options.is_memory() {
            let path = Path::new(&options.path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| CampusBotError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(&options.path)
            .build()
            .await
            .map_err(db_err)?;

        let writer = db.connect().map_err(db_err)?;
        apply_pragmas(&writer, &options, false).await?;

        let readers = if options.is_memory() {
            None
        } else {
            let mut conns = Vec::with_capacity(options.max_readers);
            for _ in 0..options.max_readers.max(1) {
                let conn = db.connect().map_err(db_err)?;
                apply_pragmas(&conn, &options, true).await?;
                conns.push(conn);
            }
            Some(ReaderPool::new(conns))
        };

        let store = Self {
            db,
            options,
            writer: Mutex::new(writer),
            readers,
        };
        store.run_migrations().await?;
        tracing::debug!(path = %store.options.path, "store opened");
        Ok(store)
    }

    /// Open an in-memory store (tests, ephemeral runs).
    pub async fn open_in_memory() -> Result<Self> {
        Self::open(StoreOptions::in_memory()).await
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Backing file path; `None` for in-memory stores.
    pub fn path(&self) -> Option<PathBuf> {
        (!self.options.is_memory()).then(|| PathBuf::from(&self.options.path))
    }

    pub fn cache_ttl(&self) -> Duration {
        self.options.cache_ttl
    }

    /// Round-trip a trivial query through a reader connection.
    pub async fn ping(&self, ctx: &RequestContext) -> Result<()> {
        let one = self
            .query_one(ctx, "SELECT 1", Params::None, |row| int(row, 0))
            .await?;
        match one {
            Some(1) => Ok(()),
            other => Err(CampusBotError::Storage(format!(
                "ping returned unexpected value {other:?}"
            ))),
        }
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;
        let conn = self.writer.lock().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    CampusBotError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let conn = self.writer.lock().await;
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Query plumbing
    // -----------------------------------------------------------------------

    /// Check out a connection for one read.
    async fn reader(&self) -> Result<ReadHandle<'_>> {
        match &self.readers {
            Some(pool) => Ok(ReadHandle::Pooled(pool.acquire().await?)),
            None => Ok(ReadHandle::Writer(self.writer.lock().await)),
        }
    }

    /// Run a read query on a pooled reader and decode every row.
    pub(crate) async fn query_all<T>(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: Params,
        decode: fn(&Row) -> Result<T>,
    ) -> Result<Vec<T>> {
        ctx.run(async {
            let reader = self.reader().await?;
            let mut rows = reader.query(sql, params).await.map_err(db_err)?;
            let mut results = Vec::new();
            while let Some(row) = rows.next().await.map_err(db_err)? {
                results.push(decode(&row)?);
            }
            Ok(results)
        })
        .await
    }

    /// Run a read query and decode the first row, if any.
    pub(crate) async fn query_one<T>(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: Params,
        decode: fn(&Row) -> Result<T>,
    ) -> Result<Option<T>> {
        ctx.run(async {
            let reader = self.reader().await?;
            let mut rows = reader.query(sql, params).await.map_err(db_err)?;
            match rows.next().await.map_err(db_err)? {
                Some(row) => Ok(Some(decode(&row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// `SELECT COUNT(*) ...` helper.
    pub(crate) async fn query_count(
        &self,
        ctx: &RequestContext,
        sql: &str,
        params: Params,
    ) -> Result<u64> {
        let count = self
            .query_one(ctx, sql, params, |row| int(row, 0))
            .await?
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    /// Execute every `(sql, rows)` group inside a single write transaction,
    /// reusing one prepared statement per group.
    ///
    /// Waiting for the writer is cancellable; once the writer is held the
    /// transaction runs to commit or rollback so no partial batch is visible.
    pub(crate) async fn write_groups(
        &self,
        ctx: &RequestContext,
        groups: Vec<(&str, Vec<Vec<Value>>)>,
    ) -> Result<()> {
        if groups.iter().all(|(_, rows)| rows.is_empty()) {
            return Ok(());
        }
        let conn = ctx.run(async { Ok(self.writer.lock().await) }).await?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let outcome: Result<()> = async {
            for (sql, rows) in groups {
                let stmt = tx.prepare(sql).await.map_err(db_err)?;
                for row in rows {
                    stmt.execute(Params::Positional(row)).await.map_err(db_err)?;
                    stmt.reset();
                }
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => tx.commit().await.map_err(db_err),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Execute a list of statements in one write transaction.
    pub(crate) async fn write_statements(
        &self,
        ctx: &RequestContext,
        statements: Vec<(&str, Vec<Value>)>,
    ) -> Result<()> {
        let conn = ctx.run(async { Ok(self.writer.lock().await) }).await?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let outcome: Result<()> = async {
            for (sql, values) in statements {
                tx.execute(sql, Params::Positional(values))
                    .await
                    .map_err(db_err)?;
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => tx.commit().await.map_err(db_err),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Execute a single write statement, returning the affected row count.
    pub(crate) async fn write_one(
        &self,
        ctx: &RequestContext,
        sql: &str,
        values: Vec<Value>,
    ) -> Result<u64> {
        let conn = ctx.run(async { Ok(self.writer.lock().await) }).await?;
        conn.execute(sql, Params::Positional(values))
            .await
            .map_err(db_err)
    }

    /// Unix-seconds cutoff for the configured hard TTL.
    pub(crate) fn fresh_cutoff(&self) -> i64 {
        cutoff(self.options.cache_ttl)
    }
}

/// Apply connection pragmas. Reader connections are additionally query-only.
async fn apply_pragmas(conn: &Connection, options: &StoreOptions, reader: bool) -> Result<()> {
    let mut pragmas = format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = {};
         PRAGMA synchronous = {};",
        options.busy_timeout.as_millis(),
        options.synchronous.as_pragma(),
    );
    if reader {
        pragmas.push_str("\nPRAGMA query_only = ON;");
    }
    conn.execute_batch(&pragmas).await.map_err(db_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

/// Classify a libSQL error into the CampusBot error model.
pub(crate) fn db_err(e: libsql::Error) -> CampusBotError {
    CampusBotError::from_storage_message(e.to_string())
}

pub(crate) fn text(row: &Row, idx: i32) -> Result<String> {
    row.get::<String>(idx).map_err(db_err)
}

pub(crate) fn opt_text(row: &Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

pub(crate) fn int(row: &Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx).map_err(db_err)
}

pub(crate) fn timestamp(row: &Row, idx: i32) -> Result<DateTime<Utc>> {
    let secs = int(row, idx)?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CampusBotError::Storage(format!("invalid cached_at: {secs}")))
}

pub(crate) fn json_list(row: &Row, idx: i32) -> Result<Vec<String>> {
    let raw = text(row, idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| CampusBotError::Storage(format!("invalid JSON array in column {idx}: {e}")))
}

pub(crate) fn encode_list(items: &[String]) -> Result<Value> {
    serde_json::to_string(items)
        .map(Value::Text)
        .map_err(|e| CampusBotError::Storage(format!("failed to encode list: {e}")))
}

pub(crate) fn text_value(s: &str) -> Value {
    Value::Text(s.to_string())
}

pub(crate) fn opt_value(s: &Option<String>) -> Value {
    match s {
        Some(v) => Value::Text(v.clone()),
        None => Value::Null,
    }
}

pub(crate) fn ts_value(dt: &DateTime<Utc>) -> Value {
    Value::Integer(dt.timestamp())
}

/// `now - ttl` in unix seconds.
pub(crate) fn cutoff(ttl: Duration) -> i64 {
    Utc::now().timestamp() - ttl.as_secs() as i64
}
