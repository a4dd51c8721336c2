//! Persisting upstream results into the store.
//!
//! Shared by the resolver's scrape tier and the warmup scheduler. One call
//! commits every row in a single transaction. Courses older than the
//! recent-semester window go to `historical_courses`.

use campusbot_shared::{Course, Entity, RequestContext, Result};
use campusbot_storage::{RECENT_SEMESTERS, Store, WriteSet};
use tracing::debug;

/// Which caller is writing back, and so which kinds it may store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Lookups and explicit refreshes. Students are only created by warmup,
    /// so student rows are served but not stored.
    RequestPath,
    /// The warmup scheduler: every kind is stored.
    Warmup,
}

impl WritePolicy {
    fn stores_students(self) -> bool {
        matches!(self, Self::Warmup)
    }
}

/// What a write-back stored.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Persisted {
    pub students: usize,
    pub contacts: usize,
    pub courses: usize,
    pub historical_courses: usize,
    pub syllabi: usize,
    /// Syllabi whose content hash differs from the cached one (or that were
    /// not cached).
    pub syllabi_changed: usize,
}

impl Persisted {
    pub fn total(&self) -> usize {
        self.students + self.contacts + self.courses + self.historical_courses + self.syllabi
    }
}

/// Upsert `entities` in one transaction, grouped by kind.
pub async fn persist(
    store: &Store,
    ctx: &RequestContext,
    entities: &[Entity],
    policy: WritePolicy,
) -> Result<Persisted> {
    let mut students = Vec::new();
    let mut contacts = Vec::new();
    let mut courses = Vec::new();
    let mut syllabi = Vec::new();
    let mut skipped_students = 0usize;
    for entity in entities {
        match entity {
            Entity::Student(_) if !policy.stores_students() => skipped_students += 1,
            Entity::Student(s) => students.push(s.clone()),
            Entity::Contact(c) => contacts.push(c.clone()),
            Entity::Course(c) => courses.push(c.clone()),
            Entity::Syllabus(s) => syllabi.push(s.clone()),
        }
    }
    if skipped_students > 0 {
        debug!(skipped = skipped_students, ?policy, "student rows not stored");
    }

    let mut out = Persisted::default();
    let mut set = WriteSet::new();

    set.students(&students)?;
    out.students = students.len();
    set.contacts(&contacts);
    out.contacts = contacts.len();
    if !courses.is_empty() {
        let (recent, historical) = split_by_window(store, ctx, courses).await?;
        set.courses(&recent)?.historical_courses(&historical)?;
        out.courses = recent.len();
        out.historical_courses = historical.len();
    }
    for syllabus in &syllabi {
        let cached = store.syllabus_hash(ctx, &syllabus.uid).await?;
        if cached.as_deref() != Some(syllabus.content_hash.as_str()) {
            out.syllabi_changed += 1;
        }
    }
    set.syllabi(&syllabi)?;
    out.syllabi = syllabi.len();

    store.commit(ctx, set).await?;

    debug!(
        students = out.students,
        contacts = out.contacts,
        courses = out.courses,
        historical = out.historical_courses,
        syllabi = out.syllabi,
        syllabi_changed = out.syllabi_changed,
        "write-back complete"
    );
    Ok(out)
}

/// Split courses into the recent window and the archive. With no live
/// courses cached yet everything counts as recent.
async fn split_by_window(
    store: &Store,
    ctx: &RequestContext,
    courses: Vec<Course>,
) -> Result<(Vec<Course>, Vec<Course>)> {
    let window = store.recent_semesters(ctx, RECENT_SEMESTERS).await?;
    let floor = window.last().copied();
    Ok(courses
        .into_iter()
        .partition(|c| floor.is_none_or(|f| c.semester() >= f)))
}
