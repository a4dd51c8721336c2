//! Composition root and the handler API exposed to the chat adapter.

use std::path::Path;
use std::sync::Arc;

use campusbot_scraper::{SiteScraper, Upstream};
use campusbot_shared::{
    AppConfig, Entity, EntityKind, ProgramCourse, RequestContext, Result,
};
use campusbot_storage::{HotSwap, Store, StoreOptions, StoreStats};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::resolver::{Resolved, Resolver, ResolverStatsSnapshot};
use crate::warmup::{CleanupReport, RefreshReport, Scheduler, WarmupReport};

/// Store counts plus resolver tier counters.
#[derive(Debug, Clone, Serialize)]
pub struct AppStats {
    pub store: StoreStats,
    pub resolver: ResolverStatsSnapshot,
}

/// Owns the live store, the upstream, the resolver, and the scheduler.
pub struct CampusBot {
    config: AppConfig,
    stores: Arc<HotSwap>,
    resolver: Resolver,
    scheduler: Arc<Scheduler>,
}

impl CampusBot {
    /// Open the configured store and wire it to the real site.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let store = Store::open(StoreOptions::from(&config)).await?;
        let upstream = Arc::new(SiteScraper::new(&config.scraper)?);
        info!(
            path = %config.storage.path,
            cache_ttl = %humantime::format_duration(config.cache.cache_ttl),
            soft_ttl = %humantime::format_duration(config.cache.soft_ttl),
            "campusbot opened"
        );
        Ok(Self::with_parts(config, store, upstream))
    }

    pub fn with_parts(config: AppConfig, store: Store, upstream: Arc<dyn Upstream>) -> Self {
        let stores = Arc::new(HotSwap::new(store, config.storage.swap_grace));
        let resolver = Resolver::new(Arc::clone(&stores), Arc::clone(&upstream));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&stores), upstream, &config));
        Self {
            config,
            stores,
            resolver,
            scheduler,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The store currently serving reads.
    pub async fn store(&self) -> Arc<Store> {
        self.stores.current().await
    }

    pub async fn lookup(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        term: &str,
    ) -> Result<Resolved> {
        self.resolver.lookup(ctx, kind, term).await
    }

    pub async fn get_by_key(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        key: &str,
    ) -> Result<Entity> {
        self.resolver.get_by_key(ctx, kind, key).await
    }

    pub async fn refresh(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        key_or_term: &str,
    ) -> Result<Vec<Entity>> {
        self.resolver.refresh(ctx, kind, key_or_term).await
    }

    pub async fn course_programs(
        &self,
        ctx: &RequestContext,
        course_uid: &str,
    ) -> Result<Vec<ProgramCourse>> {
        self.resolver.course_programs(ctx, course_uid).await
    }

    /// Run one startup warmup pass over the configured seeds.
    pub async fn warmup(&self, ctx: &RequestContext) -> Result<WarmupReport> {
        self.scheduler.startup(ctx).await
    }

    /// Run one refresh pass now; `None` when a pass is already running.
    pub async fn refresh_expiring(&self, ctx: &RequestContext) -> Result<Option<RefreshReport>> {
        self.scheduler.refresh_pass(ctx).await
    }

    pub async fn cleanup_now(&self, ctx: &RequestContext) -> Result<CleanupReport> {
        self.scheduler.cleanup_pass(ctx).await
    }

    pub async fn stats(&self, ctx: &RequestContext) -> Result<AppStats> {
        let store = self.stores.current().await.stats(ctx).await?;
        Ok(AppStats {
            store,
            resolver: self.resolver.stats(),
        })
    }

    /// Point reads at the database at `path`. The old store is retired in
    /// the background.
    pub async fn swap_store(
        &self,
        ctx: &RequestContext,
        path: impl AsRef<Path>,
    ) -> Result<JoinHandle<()>> {
        self.stores.swap(ctx, path).await
    }

    /// Start the scheduler (startup warmup, then the refresh and cleanup
    /// loops). It stops when `token` is cancelled.
    pub fn run_background(&self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.scheduler).run(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Tier;
    use crate::test_support::{MockUpstream, contact, organization, temp_db_path, test_store};
    use campusbot_shared::ErrorKind;
    use campusbot_storage::CacheTable;
    use std::time::Duration;

    async fn bot(upstream: MockUpstream) -> (CampusBot, Arc<MockUpstream>) {
        let upstream = Arc::new(upstream);
        let mut config = AppConfig::default();
        config.storage.swap_grace = Duration::from_millis(10);
        let bot = CampusBot::with_parts(config, test_store().await, upstream.clone());
        (bot, upstream)
    }

    #[tokio::test]
    async fn lookup_scrapes_once_then_serves_from_cache() {
        let (bot, upstream) = bot(MockUpstream::default().with_search(
            "資工",
            vec![Entity::Contact(organization("o1", "資工系辦"))],
        ))
        .await;
        let ctx = RequestContext::background();

        let first = bot.lookup(&ctx, EntityKind::Contact, "資工").await.unwrap();
        assert_eq!(first.tier, Tier::Upstream);
        let second = bot.lookup(&ctx, EntityKind::Contact, "資工").await.unwrap();
        assert_eq!(second.tier, Tier::Indexed);
        assert_eq!(second.entities, first.entities);
        assert_eq!(upstream.calls(), 1);

        let stats = bot.stats(&ctx).await.unwrap();
        assert_eq!(stats.resolver.upstream_calls, 1);
        assert_eq!(stats.resolver.indexed_hits, 1);
        let contacts = stats
            .store
            .tables
            .iter()
            .find(|t| t.table == CacheTable::Contacts)
            .unwrap();
        assert_eq!(contacts.total, 1);
    }

    #[tokio::test]
    async fn empty_everywhere_is_no_results() {
        let (bot, _) = bot(MockUpstream::default()).await;
        let err = bot
            .lookup(&RequestContext::background(), EntityKind::Contact, "無此人")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoResults);
    }

    #[tokio::test]
    async fn swap_store_redirects_reads() {
        let (bot, _) = bot(MockUpstream::default()).await;
        let ctx = RequestContext::background();
        bot.store()
            .await
            .save_contact(&ctx, &contact("c1", "舊資料"))
            .await
            .unwrap();

        let replacement = temp_db_path();
        {
            let next = Store::open(StoreOptions::at(&replacement)).await.unwrap();
            next.save_contact(&ctx, &contact("c2", "新資料")).await.unwrap();
        }

        let retire = bot.swap_store(&ctx, &replacement).await.unwrap();
        let store = bot.store().await;
        assert_eq!(store.get_contact(&ctx, "c2").await.unwrap().name, "新資料");
        assert_eq!(
            store.get_contact(&ctx, "c1").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        drop(store);
        tokio::time::timeout(Duration::from_secs(5), retire)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn background_loops_stop_on_cancel() {
        let (bot, _) = bot(MockUpstream::default()).await;
        let token = CancellationToken::new();
        let handle = bot.run_background(token.clone());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
