//! Background cache maintenance.
//!
//! Three jobs, all driven from [`Scheduler::run`] under one cancellation
//! token:
//!
//! - **startup**: one pass over the configured catalog seeds, fetch then
//!   save per seed
//! - **refresh**: every `soft_ttl / 4`, refetch rows past the soft TTL but
//!   still inside the hard TTL
//! - **cleanup**: every `cleanup_interval`, delete rows past the hard TTL
//!
//! The scheduler talks to the upstream and the store directly and never
//! goes through the resolver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use campusbot_scraper::Upstream;
use campusbot_shared::{
    AppConfig, CampusBotError, EntityKind, ErrorKind, RequestContext, Result, WarmupConfig,
};
use campusbot_storage::{CacheTable, HotSwap};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::writeback::{WritePolicy, persist};

/// Refresh never ticks faster than this, whatever the soft TTL.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    pub seeds: usize,
    pub failed_seeds: usize,
    pub persisted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Rows inside the soft-expired window when the pass started.
    pub expiring: u64,
    pub refreshed: usize,
    /// Keys the upstream no longer knows; left to expire.
    pub gone: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted: Vec<(CacheTable, u64)>,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.deleted.iter().map(|(_, n)| n).sum()
    }
}

pub struct Scheduler {
    stores: Arc<HotSwap>,
    upstream: Arc<dyn Upstream>,
    config: WarmupConfig,
    soft_ttl: Duration,
    cache_ttl: Duration,
    permits: Arc<Semaphore>,
    refreshing: AtomicBool,
}

/// Clears the in-progress flag when a refresh pass ends, however it ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(stores: Arc<HotSwap>, upstream: Arc<dyn Upstream>, config: &AppConfig) -> Self {
        Self {
            stores,
            upstream,
            config: config.warmup.clone(),
            soft_ttl: config.cache.soft_ttl,
            cache_ttl: config.cache.cache_ttl,
            permits: Arc::new(Semaphore::new(config.scraper.max_in_flight.max(1))),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        (self.soft_ttl / 4).max(MIN_REFRESH_INTERVAL)
    }

    /// Fetch every configured seed's catalog and save it.
    ///
    /// A failing seed is logged and skipped; cancellation aborts the pass.
    #[instrument(skip_all, fields(seeds = self.config.seeds.len()))]
    pub async fn startup(&self, ctx: &RequestContext) -> Result<WarmupReport> {
        let mut report = WarmupReport::default();
        for seed in &self.config.seeds {
            ctx.check()?;
            report.seeds += 1;
            match self.upstream.catalog(ctx, seed.kind, &seed.seed).await {
                Ok(entities) => {
                    let store = self.stores.current().await;
                    let saved = persist(&store, ctx, &entities, WritePolicy::Warmup).await?;
                    info!(
                        kind = %seed.kind,
                        seed = %seed.seed,
                        saved = saved.total(),
                        "seed warmed"
                    );
                    report.persisted += saved.total();
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(kind = %seed.kind, seed = %seed.seed, error = %e, "seed failed");
                    report.failed_seeds += 1;
                }
            }
        }
        info!(
            seeds = report.seeds,
            failed = report.failed_seeds,
            persisted = report.persisted,
            "startup warmup complete"
        );
        Ok(report)
    }

    /// Refetch soft-expired rows of every TTL-governed kind.
    ///
    /// Returns `None` without doing anything when another pass is still
    /// running.
    #[instrument(skip_all)]
    pub async fn refresh_pass(&self, ctx: &RequestContext) -> Result<Option<RefreshReport>> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            debug!("previous refresh pass still running, skipping");
            return Ok(None);
        }
        let _running = RefreshGuard(&self.refreshing);

        let mut report = RefreshReport::default();
        for kind in EntityKind::ALL.into_iter().filter(EntityKind::ttl_governed) {
            ctx.check()?;
            let table = CacheTable::for_kind(kind);
            let store = self.stores.current().await;
            let expiring = store.count_expiring(ctx, table, self.soft_ttl).await?;
            if expiring == 0 {
                continue;
            }
            let keys = store
                .list_expiring_keys(ctx, table, self.soft_ttl, self.config.refresh_batch)
                .await?;
            drop(store);

            debug!(kind = %kind, expiring, batch = keys.len(), "refreshing expiring rows");
            report.expiring += expiring;
            self.refresh_keys(ctx, kind, keys, &mut report).await?;
        }

        info!(
            expiring = report.expiring,
            refreshed = report.refreshed,
            gone = report.gone,
            failed = report.failed,
            "refresh pass complete"
        );
        Ok(Some(report))
    }

    async fn refresh_keys(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        keys: Vec<String>,
        report: &mut RefreshReport,
    ) -> Result<()> {
        let mut tasks = JoinSet::new();
        for key in keys {
            let permit = ctx
                .run(async {
                    Arc::clone(&self.permits)
                        .acquire_owned()
                        .await
                        .map_err(|_| CampusBotError::Unavailable("refresh permits closed".into()))
                })
                .await?;
            let upstream = Arc::clone(&self.upstream);
            let stores = Arc::clone(&self.stores);
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = async {
                    let entity = upstream.fetch_by_key(&ctx, kind, &key).await?;
                    let store = stores.current().await;
                    persist(&store, &ctx, std::slice::from_ref(&entity), WritePolicy::Warmup)
                        .await?;
                    Ok::<_, CampusBotError>(())
                }
                .await;
                (key, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.refreshed += 1,
                Ok((_, Err(e))) if e.is_cancelled() => return Err(e),
                Ok((key, Err(e))) if e.kind() == ErrorKind::NotFound => {
                    debug!(kind = %kind, key = %key, "gone upstream, leaving it to expire");
                    report.gone += 1;
                }
                Ok((key, Err(e))) => {
                    warn!(kind = %kind, key = %key, error = %e, "refresh failed");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "refresh task failed");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Delete rows past the hard TTL from every TTL-governed table.
    #[instrument(skip_all)]
    pub async fn cleanup_pass(&self, ctx: &RequestContext) -> Result<CleanupReport> {
        let store = self.stores.current().await;
        let mut report = CleanupReport::default();
        for table in CacheTable::TTL_GOVERNED {
            let deleted = store.delete_expired(ctx, table, self.cache_ttl).await?;
            info!(table = %table, deleted, "expired rows deleted");
            report.deleted.push((table, deleted));
        }
        Ok(report)
    }

    /// Startup warmup (when enabled), then the refresh and cleanup loops
    /// until `token` fires.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let ctx = RequestContext::with_token(token);

        if self.config.startup && !self.config.seeds.is_empty() {
            if let Err(e) = self.startup(&ctx).await {
                if e.is_cancelled() {
                    return;
                }
                warn!(error = %e, "startup warmup failed");
            }
        }
        if !self.config.enabled {
            debug!("background refresh disabled");
            return;
        }

        tokio::join!(self.refresh_loop(&ctx), self.cleanup_loop(&ctx));
        info!("warmup scheduler stopped");
    }

    async fn refresh_loop(&self, ctx: &RequestContext) {
        let period = self.refresh_interval();
        info!(period = %humantime::format_duration(period), "refresh loop started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ctx.done() => break,
                _ = ticker.tick() => {}
            }
            match self.refresh_pass(ctx).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(error = %e, "refresh pass failed"),
            }
        }
    }

    async fn cleanup_loop(&self, ctx: &RequestContext) {
        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ctx.done() => break,
                _ = ticker.tick() => {}
            }
            match self.cleanup_pass(ctx).await {
                Ok(_) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(error = %e, "cleanup pass failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockUpstream, contact, organization, student, test_hotswap};
    use campusbot_shared::{Entity, WarmupSeed};
    use chrono::{TimeDelta, Utc};

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.cache.cache_ttl = Duration::from_secs(7 * 24 * 3600);
        config.cache.soft_ttl = Duration::from_secs(5 * 24 * 3600);
        config
    }

    fn days_old(mut c: campusbot_shared::Contact, days: i64) -> campusbot_shared::Contact {
        c.cached_at = Utc::now() - TimeDelta::days(days);
        c
    }

    #[tokio::test]
    async fn refresh_pass_refetches_soft_expired_rows() {
        let upstream = Arc::new(
            MockUpstream::default().with_key(Entity::Contact(organization("c1", "資訊工程學系"))),
        );
        let stores = test_hotswap().await;
        let ctx = RequestContext::background();
        let store = stores.current().await;
        store
            .save_contacts(
                &ctx,
                &[
                    days_old(organization("c1", "資訊工程學系"), 6),
                    days_old(contact("c2", "還很新"), 1),
                ],
            )
            .await
            .unwrap();

        let scheduler = Scheduler::new(Arc::clone(&stores), upstream.clone(), &config());
        let report = scheduler.refresh_pass(&ctx).await.unwrap().unwrap();
        assert_eq!(report.expiring, 1);
        assert_eq!(report.refreshed, 1);
        assert_eq!(upstream.fetched_keys(), vec!["c1"]);

        let refreshed = store.get_contact(&ctx, "c1").await.unwrap();
        assert!(Utc::now() - refreshed.cached_at < TimeDelta::seconds(5));
        assert_eq!(
            store
                .count_expiring(&ctx, CacheTable::Contacts, config().cache.soft_ttl)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn refresh_tolerates_missing_and_unavailable_keys() {
        let stores = test_hotswap().await;
        let ctx = RequestContext::background();
        stores
            .current()
            .await
            .save_contacts(&ctx, &[days_old(contact("gone", "離職"), 6)])
            .await
            .unwrap();

        let missing =
            Scheduler::new(Arc::clone(&stores), Arc::new(MockUpstream::default()), &config());
        let report = missing.refresh_pass(&ctx).await.unwrap().unwrap();
        assert_eq!(report.gone, 1);
        assert_eq!(report.failed, 0);

        let down = Scheduler::new(
            Arc::clone(&stores),
            Arc::new(MockUpstream::default().failing(CampusBotError::Unavailable("503".into()))),
            &config(),
        );
        let report = down.refresh_pass(&ctx).await.unwrap().unwrap();
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn overlapping_refresh_is_skipped() {
        let upstream = Arc::new(
            MockUpstream::default()
                .with_key(Entity::Contact(contact("c1", "王")))
                .with_delay(Duration::from_millis(200)),
        );
        let stores = test_hotswap().await;
        let ctx = RequestContext::background();
        stores
            .current()
            .await
            .save_contacts(&ctx, &[days_old(contact("c1", "王"), 6)])
            .await
            .unwrap();

        let scheduler = Scheduler::new(stores, upstream, &config());
        let (first, second) =
            tokio::join!(scheduler.refresh_pass(&ctx), scheduler.refresh_pass(&ctx));
        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_none()).count(), 1);
        assert_eq!(outcomes.iter().flatten().map(|r| r.refreshed).sum::<usize>(), 1);

        // The flag is released once the pass ends.
        assert!(scheduler.refresh_pass(&ctx).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_deletes_hard_expired_rows_but_keeps_students() {
        let stores = test_hotswap().await;
        let ctx = RequestContext::background();
        let store = stores.current().await;
        store
            .save_contacts(&ctx, &[days_old(contact("old", "舊"), 8), contact("new", "新")])
            .await
            .unwrap();
        let mut alumnus = student("400000001", "校友", 100);
        alumnus.cached_at = Utc::now() - TimeDelta::days(400);
        store.save_student(&ctx, &alumnus).await.unwrap();

        let scheduler =
            Scheduler::new(Arc::clone(&stores), Arc::new(MockUpstream::default()), &config());
        let report = scheduler.cleanup_pass(&ctx).await.unwrap();
        assert_eq!(report.total(), 1);
        assert!(report.deleted.contains(&(CacheTable::Contacts, 1)));
        assert_eq!(store.count_students(&ctx).await.unwrap(), 1);
        assert!(store.get_student(&ctx, "400000001").await.is_ok());
    }

    #[tokio::test]
    async fn startup_warms_each_seed_and_skips_failures() {
        let upstream = Arc::new(MockUpstream::default().with_catalog(
            EntityKind::Student,
            "112",
            vec![
                Entity::Student(student("112000001", "甲", 112)),
                Entity::Student(student("112000002", "乙", 112)),
            ],
        ));
        let stores = test_hotswap().await;
        let mut config = config();
        config.warmup.seeds = vec![
            WarmupSeed {
                kind: EntityKind::Student,
                seed: "112".into(),
            },
            WarmupSeed {
                kind: EntityKind::Contact,
                seed: "不存在".into(),
            },
        ];

        let scheduler = Scheduler::new(Arc::clone(&stores), upstream, &config);
        let ctx = RequestContext::background();
        let report = scheduler.startup(&ctx).await.unwrap();
        assert_eq!(
            report,
            WarmupReport {
                seeds: 2,
                failed_seeds: 1,
                persisted: 2,
            }
        );
        assert_eq!(stores.current().await.count_students(&ctx).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn run_stops_when_cancelled() {
        let stores = test_hotswap().await;
        let scheduler = Arc::new(Scheduler::new(
            stores,
            Arc::new(MockUpstream::default()),
            &config(),
        ));
        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&scheduler).run(token.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler stops promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn refresh_interval_is_a_quarter_of_soft_ttl() {
        let stores = test_hotswap().await;
        let mut config = config();
        let scheduler =
            Scheduler::new(Arc::clone(&stores), Arc::new(MockUpstream::default()), &config);
        assert_eq!(scheduler.refresh_interval(), Duration::from_secs(30 * 3600));

        config.cache.soft_ttl = Duration::from_secs(8);
        let scheduler = Scheduler::new(stores, Arc::new(MockUpstream::default()), &config);
        assert_eq!(scheduler.refresh_interval(), MIN_REFRESH_INTERVAL);
    }
}
