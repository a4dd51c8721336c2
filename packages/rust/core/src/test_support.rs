//! Fixtures and an in-memory upstream for resolver and warmup tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use campusbot_scraper::{Upstream, compute_content_hash};
use campusbot_shared::{
    CampusBotError, Contact, ContactType, Course, Entity, EntityKind, ProgramCourse,
    RequestContext, Result, Student, Syllabus,
};
use campusbot_storage::{HotSwap, Store, StoreOptions};
use chrono::Utc;
use uuid::Uuid;

pub(crate) fn temp_db_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("campusbot_core_test_{}.db", Uuid::now_v7()))
}

pub(crate) async fn test_store() -> Store {
    Store::open(StoreOptions::at(temp_db_path()))
        .await
        .expect("open test db")
}

pub(crate) async fn test_hotswap() -> Arc<HotSwap> {
    Arc::new(HotSwap::new(test_store().await, Duration::from_millis(10)))
}

pub(crate) fn contact(uid: &str, name: &str) -> Contact {
    Contact::new(uid, ContactType::Individual, name)
}

pub(crate) fn organization(uid: &str, name: &str) -> Contact {
    Contact::new(uid, ContactType::Organization, name)
}

pub(crate) fn student(id: &str, name: &str, year: i64) -> Student {
    Student {
        id: id.into(),
        name: name.into(),
        year,
        department: "資訊工程學系".into(),
        cached_at: Utc::now(),
    }
}

pub(crate) fn course(uid: &str, year: i64, term: i64, title: &str) -> Course {
    Course {
        uid: uid.into(),
        year,
        term,
        no: format!("N{uid}"),
        title: title.into(),
        teachers: vec!["王大明".into()],
        teacher_urls: Vec::new(),
        times: vec!["一2".into()],
        locations: vec!["資訊大樓 101".into()],
        detail_url: None,
        note: None,
        cached_at: Utc::now(),
    }
}

pub(crate) fn syllabus(uid: &str, title: &str, schedule: &str) -> Syllabus {
    Syllabus {
        uid: uid.into(),
        year: 113,
        term: 1,
        title: title.into(),
        teachers: vec!["王大明".into()],
        objectives: String::new(),
        outline: String::new(),
        schedule: schedule.into(),
        content_hash: compute_content_hash(&[title, "王大明", "", "", schedule]),
        cached_at: Utc::now(),
    }
}

/// Canned upstream that counts every call.
#[derive(Default)]
pub(crate) struct MockUpstream {
    searches: HashMap<String, Vec<Entity>>,
    keys: HashMap<(EntityKind, String), Entity>,
    catalogs: HashMap<(EntityKind, String), Vec<Entity>>,
    programs: HashMap<String, Vec<ProgramCourse>>,
    failure: Option<CampusBotError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    fetched_keys: Mutex<Vec<String>>,
}

impl MockUpstream {
    pub(crate) fn with_search(mut self, term: &str, entities: Vec<Entity>) -> Self {
        self.searches.insert(term.to_string(), entities);
        self
    }

    pub(crate) fn with_key(mut self, entity: Entity) -> Self {
        self.keys
            .insert((entity.kind(), entity.key().to_string()), entity);
        self
    }

    pub(crate) fn with_catalog(
        mut self,
        kind: EntityKind,
        seed: &str,
        entities: Vec<Entity>,
    ) -> Self {
        self.catalogs.insert((kind, seed.to_string()), entities);
        self
    }

    pub(crate) fn with_programs(mut self, course_uid: &str, programs: Vec<ProgramCourse>) -> Self {
        self.programs.insert(course_uid.to_string(), programs);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every call fails with `err`.
    pub(crate) fn failing(mut self, err: CampusBotError) -> Self {
        self.failure = Some(err);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fetched_keys(&self) -> Vec<String> {
        self.fetched_keys.lock().expect("fetched_keys lock").clone()
    }

    async fn enter(&self, ctx: &RequestContext) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            ctx.sleep(delay).await?;
        }
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Upstream for MockUpstream {
    async fn search(
        &self,
        ctx: &RequestContext,
        _kind: EntityKind,
        term: &str,
    ) -> Result<Vec<Entity>> {
        self.enter(ctx).await?;
        Ok(self.searches.get(term).cloned().unwrap_or_default())
    }

    async fn fetch_by_key(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        key: &str,
    ) -> Result<Entity> {
        self.enter(ctx).await?;
        self.fetched_keys
            .lock()
            .expect("fetched_keys lock")
            .push(key.to_string());
        let mut entity = self
            .keys
            .get(&(kind, key.to_string()))
            .cloned()
            .ok_or_else(|| CampusBotError::not_found(kind.as_str(), key))?;
        restamp(&mut entity);
        Ok(entity)
    }

    async fn catalog(
        &self,
        ctx: &RequestContext,
        kind: EntityKind,
        seed: &str,
    ) -> Result<Vec<Entity>> {
        self.enter(ctx).await?;
        self.catalogs
            .get(&(kind, seed.to_string()))
            .cloned()
            .ok_or_else(|| CampusBotError::ClientError {
                url: format!("mock://{kind}/{seed}"),
                status: 404,
            })
    }

    async fn course_programs(
        &self,
        ctx: &RequestContext,
        course_uid: &str,
    ) -> Result<Vec<ProgramCourse>> {
        self.enter(ctx).await?;
        Ok(self.programs.get(course_uid).cloned().unwrap_or_default())
    }
}

/// A fetched entity is stamped at fetch time.
fn restamp(entity: &mut Entity) {
    let now = Utc::now();
    match entity {
        Entity::Student(s) => s.cached_at = now,
        Entity::Contact(c) => c.cached_at = now,
        Entity::Course(c) => c.cached_at = now,
        Entity::Syllabus(s) => s.cached_at = now,
    }
}
