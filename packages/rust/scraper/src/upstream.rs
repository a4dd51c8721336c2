//! The upstream seam: what the resolver and warmup need from the site.

use async_trait::async_trait;
use campusbot_shared::{
    CampusBotError, Entity, EntityKind, ProgramCourse, RequestContext, Result, ScraperConfig,
};
use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use crate::client::Fetcher;
use crate::parsers::{ParsedPage, ParserRegistry, parse_program_index, parse_program_rows};
use crate::programs::match_program_name;
use crate::routes::{Route, UpstreamRoutes};

/// Source of truth behind the cache.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Entities matching a free-text term.
    async fn search(&self, ctx: &RequestContext, kind: EntityKind, term: &str)
    -> Result<Vec<Entity>>;

    /// One entity by primary key; `NotFound` when the site has no such key.
    async fn fetch_by_key(&self, ctx: &RequestContext, kind: EntityKind, key: &str)
    -> Result<Entity>;

    /// Bulk listing for warmup (cohort, organization, semester, ...).
    async fn catalog(&self, ctx: &RequestContext, kind: EntityKind, seed: &str)
    -> Result<Vec<Entity>>;

    /// Program memberships listed on a course's detail page.
    async fn course_programs(
        &self,
        _ctx: &RequestContext,
        _course_uid: &str,
    ) -> Result<Vec<ProgramCourse>> {
        Ok(Vec::new())
    }
}

/// [`Upstream`] backed by the real site: fetcher + routes + HTML parsers.
pub struct SiteScraper {
    fetcher: Fetcher,
    routes: UpstreamRoutes,
    parsers: ParserRegistry,
    program_names: OnceCell<Vec<String>>,
    jaccard_threshold: f64,
}

impl SiteScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(config)?,
            routes: UpstreamRoutes::new(&config.base_urls)?,
            parsers: ParserRegistry::new(),
            program_names: OnceCell::new(),
            jaccard_threshold: config.program_match_threshold,
        })
    }

    async fn fetch_page(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        route: &Route,
    ) -> Result<ParsedPage> {
        let urls = self.routes.resolve(route)?;
        let doc = self.fetcher.fetch_any(ctx, &urls).await?;
        let parser = self.parsers.for_kind(kind)?;
        let page = parser.parse(&doc.html(), &doc.url, Utc::now())?;
        debug!(
            url = %doc.url,
            parser = parser.name(),
            entities = page.entities.len(),
            skipped = page.skipped,
            "page parsed"
        );
        Ok(page)
    }

    /// Canonical program names, fetched once. A failed fetch is retried on
    /// the next call.
    async fn program_names(&self, ctx: &RequestContext) -> Result<&[String]> {
        let names = self
            .program_names
            .get_or_try_init(|| async {
                let urls = self.routes.resolve(&Route::programs())?;
                let doc = self.fetcher.fetch_any(ctx, &urls).await?;
                let names = parse_program_index(&doc.html())?;
                debug!(count = names.len(), "program index loaded");
                Ok::<_, CampusBotError>(names)
            })
            .await?;
        Ok(names.as_slice())
    }
}

#[async_trait]
impl Upstream for SiteScraper {
    #[instrument(skip_all, fields(kind = %kind, term = %term))]
    async fn search(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        term: &str,
    ) -> Result<Vec<Entity>> {
        let page = self.fetch_page(ctx, kind, &Route::search(kind, term)).await?;
        Ok(page.entities)
    }

    #[instrument(skip_all, fields(kind = %kind, key = %key))]
    async fn fetch_by_key(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        key: &str,
    ) -> Result<Entity> {
        let page = match self.fetch_page(ctx, kind, &Route::detail(kind, key)).await {
            Err(CampusBotError::ClientError { status: 404, .. }) => {
                return Err(CampusBotError::not_found(kind.as_str(), key));
            }
            other => other?,
        };
        page.entities
            .into_iter()
            .find(|e| e.key() == key)
            .ok_or_else(|| CampusBotError::not_found(kind.as_str(), key))
    }

    #[instrument(skip_all, fields(kind = %kind, seed = %seed))]
    async fn catalog(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        seed: &str,
    ) -> Result<Vec<Entity>> {
        let page = self.fetch_page(ctx, kind, &Route::catalog(kind, seed)).await?;
        Ok(page.entities)
    }

    #[instrument(skip_all, fields(course_uid = %course_uid))]
    async fn course_programs(
        &self,
        ctx: &RequestContext,
        course_uid: &str,
    ) -> Result<Vec<ProgramCourse>> {
        let urls = self
            .routes
            .resolve(&Route::detail(EntityKind::Course, course_uid))?;
        let doc = self.fetcher.fetch_any(ctx, &urls).await?;
        let raw = parse_program_rows(&doc.html())?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let canonical: &[String] = match self.program_names(ctx).await {
            Ok(names) => names,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "program index unavailable, keeping page names");
                &[]
            }
        };

        let mut programs: Vec<ProgramCourse> = Vec::with_capacity(raw.len());
        for (name, course_type) in raw {
            let program_name = match_program_name(&name, canonical, self.jaccard_threshold)
                .map(String::from)
                .unwrap_or(name);
            if programs.iter().any(|p| p.program_name == program_name) {
                continue;
            }
            programs.push(ProgramCourse {
                course_uid: course_uid.to_string(),
                program_name,
                course_type,
            });
        }
        Ok(programs)
    }
}
