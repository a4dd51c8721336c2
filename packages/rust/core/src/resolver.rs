//! Cache-first lookups.
//!
//! Every kind runs the same cascade: indexed substring search, then a fuzzy
//! code-point scan over the cache, then an upstream fetch whose results are
//! written back. Tiers 1 and 2 read through the store's TTL filter, so a
//! returned row is never past the hard TTL. The deadline is checked between
//! tiers.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use campusbot_scraper::Upstream;
use campusbot_shared::{
    CampusBotError, ContactType, Entity, EntityKind, ErrorKind, ProgramCourse, RequestContext,
    Result, Student,
};
use campusbot_storage::{HotSwap, SEARCH_LIMIT, Store, validate_term};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::singleflight::SingleFlight;
use crate::writeback::{WritePolicy, persist};

/// What an upstream call is for. Searches and key fetches for the same text
/// hit different pages, so they never share a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FlightOp {
    Search,
    Key,
}

type FlightKey = (FlightOp, EntityKind, String);

/// Where a lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Indexed,
    Fuzzy,
    Upstream,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::Fuzzy => "fuzzy",
            Self::Upstream => "upstream",
        }
    }
}

/// Hit counters. Cheap to bump from any task.
#[derive(Debug, Default)]
pub struct ResolverStats {
    indexed_hits: AtomicU64,
    fuzzy_hits: AtomicU64,
    key_hits: AtomicU64,
    upstream_calls: AtomicU64,
    no_results: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStatsSnapshot {
    pub indexed_hits: u64,
    pub fuzzy_hits: u64,
    pub key_hits: u64,
    pub upstream_calls: u64,
    pub no_results: u64,
}

impl ResolverStats {
    fn hit(&self, tier: Tier) {
        let counter = match tier {
            Tier::Indexed => &self.indexed_hits,
            Tier::Fuzzy => &self.fuzzy_hits,
            Tier::Upstream => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            indexed_hits: self.indexed_hits.load(Ordering::Relaxed),
            fuzzy_hits: self.fuzzy_hits.load(Ordering::Relaxed),
            key_hits: self.key_hits.load(Ordering::Relaxed),
            upstream_calls: self.upstream_calls.load(Ordering::Relaxed),
            no_results: self.no_results.load(Ordering::Relaxed),
        }
    }
}

/// The result of a lookup plus the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub tier: Tier,
    pub entities: Vec<Entity>,
}

pub struct Resolver {
    stores: Arc<HotSwap>,
    upstream: Arc<dyn Upstream>,
    flights: SingleFlight<FlightKey, Vec<Entity>>,
    stats: Arc<ResolverStats>,
}

impl Resolver {
    pub fn new(stores: Arc<HotSwap>, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            stores,
            upstream,
            flights: SingleFlight::new(),
            stats: Arc::new(ResolverStats::default()),
        }
    }

    pub fn stats(&self) -> ResolverStatsSnapshot {
        self.stats.snapshot()
    }

    /// Entities of `kind` matching `term`, sorted and capped.
    ///
    /// Fails with `NoResults` when every tier comes back empty.
    #[instrument(skip_all, fields(kind = %kind, term = %term, request_id = ctx.request_id()))]
    pub async fn lookup(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        term: &str,
    ) -> Result<Resolved> {
        let term = validate_term(term)?;
        ctx.check()?;

        let store = self.stores.current().await;
        let hits = indexed_search(&store, ctx, kind, term).await?;
        if !hits.is_empty() {
            return Ok(self.answer(Tier::Indexed, kind, hits));
        }

        ctx.check()?;
        let hits = fuzzy_search(&store, ctx, kind, term).await?;
        if !hits.is_empty() {
            return Ok(self.answer(Tier::Fuzzy, kind, hits));
        }
        // Release the store before a slow fetch so a swap can retire it.
        drop(store);

        ctx.check()?;
        let fetched = self.fetch_search(ctx, kind, term).await?;
        Ok(self.answer(Tier::Upstream, kind, fetched))
    }

    /// One entity by primary key, from the cache or else the upstream.
    #[instrument(skip_all, fields(kind = %kind, key = %key, request_id = ctx.request_id()))]
    pub async fn get_by_key(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        key: &str,
    ) -> Result<Entity> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CampusBotError::invalid("key is empty"));
        }
        ctx.check()?;

        let store = self.stores.current().await;
        match cached_by_key(&store, ctx, kind, key).await {
            Ok(entity) => {
                self.stats.key_hits.fetch_add(1, Ordering::Relaxed);
                debug!("key served from cache");
                return Ok(entity);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        drop(store);

        ctx.check()?;
        self.fetch_key(ctx, kind, key)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CampusBotError::not_found(kind.as_str(), key))
    }

    /// Bypass the cache: refetch `key_or_term` upstream and write it back.
    ///
    /// Tried as a primary key first; when the site has no such key the text
    /// is refreshed as a search term instead.
    #[instrument(
        skip_all,
        fields(kind = %kind, term = %key_or_term, request_id = ctx.request_id())
    )]
    pub async fn refresh(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        key_or_term: &str,
    ) -> Result<Vec<Entity>> {
        let text = validate_term(key_or_term)?;
        ctx.check()?;
        match self.fetch_key(ctx, kind, text).await {
            Ok(entities) => Ok(entities),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("not a key, refreshing as a search term");
                let mut entities = self.fetch_search(ctx, kind, text).await?;
                sort_and_cap(kind, &mut entities);
                Ok(entities)
            }
            Err(e) => Err(e),
        }
    }

    /// Program memberships of a course. Cached rows are served as-is; on a
    /// miss the course is resolved first (the rows reference it) and the
    /// memberships are fetched and stored with replace-all semantics.
    #[instrument(skip_all, fields(course_uid = %course_uid))]
    pub async fn course_programs(
        &self,
        ctx: &RequestContext,
        course_uid: &str,
    ) -> Result<Vec<ProgramCourse>> {
        let store = self.stores.current().await;
        let cached = store.programs_for_course(ctx, course_uid).await?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        drop(store);

        let course = self.get_by_key(ctx, EntityKind::Course, course_uid).await?;
        ctx.check()?;
        self.stats.upstream_calls.fetch_add(1, Ordering::Relaxed);
        let mut programs = self.upstream.course_programs(ctx, course.key()).await?;
        programs.sort_by(|a, b| a.program_name.cmp(&b.program_name));

        let store = self.stores.current().await;
        if let Err(e) = store
            .replace_course_programs(ctx, course.key(), &programs)
            .await
        {
            warn!(error = %e, "failed to cache program memberships");
        }
        Ok(programs)
    }

    fn answer(&self, tier: Tier, kind: EntityKind, mut entities: Vec<Entity>) -> Resolved {
        self.stats.hit(tier);
        sort_and_cap(kind, &mut entities);
        debug!(tier = tier.as_str(), count = entities.len(), "lookup answered");
        Resolved { tier, entities }
    }

    /// Tier 3 under single-flight. The shared call runs on a detached
    /// context so one caller's cancellation cannot fail the others.
    async fn fetch_search(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        term: &str,
    ) -> Result<Vec<Entity>> {
        let key = (FlightOp::Search, kind, term.to_string());
        let call = self.upstream_call(ctx, FlightOp::Search, kind, term);
        let entities = match self.flights.run(ctx, key, move || call).await {
            Err(CampusBotError::ClientError { status: 404, .. }) => Vec::new(),
            other => other?,
        };
        if entities.is_empty() {
            self.stats.no_results.fetch_add(1, Ordering::Relaxed);
            return Err(CampusBotError::no_results(kind.as_str(), term));
        }
        Ok(entities)
    }

    async fn fetch_key(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        key: &str,
    ) -> Result<Vec<Entity>> {
        let flight = (FlightOp::Key, kind, key.to_string());
        let call = self.upstream_call(ctx, FlightOp::Key, kind, key);
        self.flights.run(ctx, flight, move || call).await
    }

    /// The owned future a flight leader runs: fetch, then write back.
    fn upstream_call(
        &self,
        ctx: &RequestContext,
        op: FlightOp,
        kind: EntityKind,
        text: &str,
    ) -> impl Future<Output = Result<Vec<Entity>>> + Send + 'static + use<> {
        let upstream = Arc::clone(&self.upstream);
        let stores = Arc::clone(&self.stores);
        let stats = Arc::clone(&self.stats);
        let detached = ctx.detach_for_async();
        let text = text.to_string();
        async move {
            stats.upstream_calls.fetch_add(1, Ordering::Relaxed);
            let entities = match op {
                FlightOp::Search => upstream.search(&detached, kind, &text).await?,
                FlightOp::Key => vec![upstream.fetch_by_key(&detached, kind, &text).await?],
            };
            if !entities.is_empty() {
                let store = stores.current().await;
                if let Err(e) =
                    persist(&store, &detached, &entities, WritePolicy::RequestPath).await
                {
                    warn!(kind = %kind, error = %e, "write-back failed, serving fetched rows");
                }
            }
            Ok(entities)
        }
    }
}

// ---------------------------------------------------------------------------
// Per-kind dispatch
// ---------------------------------------------------------------------------

async fn indexed_search(
    store: &Store,
    ctx: &RequestContext,
    kind: EntityKind,
    term: &str,
) -> Result<Vec<Entity>> {
    Ok(match kind {
        EntityKind::Student if Student::looks_like_id(term) => store
            .search_students_by_id_prefix(ctx, term)
            .await?
            .into_iter()
            .map(Entity::Student)
            .collect(),
        EntityKind::Student => store
            .search_students_by_name(ctx, term)
            .await?
            .into_iter()
            .map(Entity::Student)
            .collect(),
        EntityKind::Contact => store
            .search_contacts(ctx, term)
            .await?
            .into_iter()
            .map(Entity::Contact)
            .collect(),
        EntityKind::Course => {
            let mut courses = store.search_courses(ctx, term).await?;
            if courses.is_empty() {
                courses = store.search_courses_by_teacher(ctx, term).await?;
            }
            if courses.is_empty() {
                courses = store.search_historical_courses(ctx, term, None).await?;
            }
            courses.into_iter().map(Entity::Course).collect()
        }
        EntityKind::Syllabus => store
            .search_syllabi(ctx, term)
            .await?
            .into_iter()
            .map(Entity::Syllabus)
            .collect(),
    })
}

async fn fuzzy_search(
    store: &Store,
    ctx: &RequestContext,
    kind: EntityKind,
    term: &str,
) -> Result<Vec<Entity>> {
    Ok(match kind {
        EntityKind::Student => store
            .fuzzy_search_students(ctx, term)
            .await?
            .into_iter()
            .map(Entity::Student)
            .collect(),
        EntityKind::Contact => store
            .fuzzy_search_contacts(ctx, term)
            .await?
            .into_iter()
            .map(Entity::Contact)
            .collect(),
        EntityKind::Course => store
            .fuzzy_search_courses(ctx, term)
            .await?
            .into_iter()
            .map(Entity::Course)
            .collect(),
        EntityKind::Syllabus => store
            .fuzzy_search_syllabi(ctx, term)
            .await?
            .into_iter()
            .map(Entity::Syllabus)
            .collect(),
    })
}

async fn cached_by_key(
    store: &Store,
    ctx: &RequestContext,
    kind: EntityKind,
    key: &str,
) -> Result<Entity> {
    match kind {
        EntityKind::Student => store.get_student(ctx, key).await.map(Entity::Student),
        EntityKind::Contact => store.get_contact(ctx, key).await.map(Entity::Contact),
        EntityKind::Course => match store.get_course(ctx, key).await {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                store.get_historical_course(ctx, key).await.map(Entity::Course)
            }
            other => other.map(Entity::Course),
        },
        EntityKind::Syllabus => store.get_syllabus(ctx, key).await.map(Entity::Syllabus),
    }
}

/// Stable ordering per kind, duplicates (by key) dropped, capped at
/// [`SEARCH_LIMIT`].
///
/// Contacts: organizations before individuals, then by name. Courses and
/// syllabi: newest semester first, then by title. Students: newest cohort
/// first, then by ID.
pub fn sort_and_cap(kind: EntityKind, entities: &mut Vec<Entity>) {
    let mut seen = std::collections::HashSet::new();
    entities.retain(|e| e.kind() == kind && seen.insert(e.key().to_string()));

    entities.sort_by(|a, b| match (a, b) {
        (Entity::Contact(x), Entity::Contact(y)) => {
            let rank = |t: ContactType| (t != ContactType::Organization) as u8;
            rank(x.contact_type)
                .cmp(&rank(y.contact_type))
                .then_with(|| x.name.cmp(&y.name))
        }
        (Entity::Course(x), Entity::Course(y)) => y
            .semester()
            .cmp(&x.semester())
            .then_with(|| x.title.cmp(&y.title)),
        (Entity::Syllabus(x), Entity::Syllabus(y)) => (y.year, y.term)
            .cmp(&(x.year, x.term))
            .then_with(|| x.title.cmp(&y.title)),
        (Entity::Student(x), Entity::Student(y)) => {
            y.year.cmp(&x.year).then_with(|| x.id.cmp(&y.id))
        }
        _ => std::cmp::Ordering::Equal,
    });
    entities.truncate(SEARCH_LIMIT);
}
