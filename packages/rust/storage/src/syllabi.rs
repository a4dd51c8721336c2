//! Syllabus rows, keyed by the owning course's UID. TTL-governed.

use campusbot_shared::{CampusBotError, RequestContext, Result, Syllabus};
use libsql::params::Params;
use libsql::{Row, Value};

use crate::search::{CharSet, contains_pattern, validate_term};
use crate::writeset::WriteSet;
use crate::{
    SEARCH_LIMIT, Store, encode_list, int, json_list, text, text_value, timestamp, ts_value,
};

/// Row cap for the fuzzy title scan.
pub const SYLLABUS_FUZZY_LIMIT: usize = 1000;

const SYLLABUS_COLUMNS: &str =
    "uid, year, term, title, teachers, objectives, outline, schedule, content_hash, cached_at";

pub(crate) const UPSERT_SYLLABUS: &str = "INSERT INTO syllabi (uid, year, term, title, teachers,
       objectives, outline, schedule, content_hash, cached_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
     ON CONFLICT(uid) DO UPDATE SET
       year = excluded.year,
       term = excluded.term,
       title = excluded.title,
       teachers = excluded.teachers,
       objectives = excluded.objectives,
       outline = excluded.outline,
       schedule = excluded.schedule,
       content_hash = excluded.content_hash,
       cached_at = excluded.cached_at";

impl Store {
    pub async fn get_syllabus(&self, ctx: &RequestContext, uid: &str) -> Result<Syllabus> {
        let sql = format!(
            "SELECT {SYLLABUS_COLUMNS} FROM syllabi WHERE uid = ?1 AND cached_at > ?2"
        );
        self.query_one(
            ctx,
            &sql,
            Params::Positional(vec![text_value(uid), Value::Integer(self.fresh_cutoff())]),
            row_to_syllabus,
        )
        .await?
        .ok_or_else(|| CampusBotError::not_found("syllabus", uid))
    }

    /// Stored content hash of a syllabus, regardless of age.
    ///
    /// Used to skip rewriting unchanged payloads; an expired row still tells
    /// us what we saw last time.
    pub async fn syllabus_hash(&self, ctx: &RequestContext, uid: &str) -> Result<Option<String>> {
        self.query_one(
            ctx,
            "SELECT content_hash FROM syllabi WHERE uid = ?1",
            Params::Positional(vec![text_value(uid)]),
            |row| text(row, 0),
        )
        .await
    }

    pub async fn search_syllabi(&self, ctx: &RequestContext, term: &str) -> Result<Vec<Syllabus>> {
        let term = validate_term(term)?;
        let sql = format!(
            "SELECT {SYLLABUS_COLUMNS} FROM syllabi
             WHERE title LIKE ?1 ESCAPE '\\' AND cached_at > ?2
             ORDER BY year DESC, term DESC, title
             LIMIT {SEARCH_LIMIT}"
        );
        self.query_all(
            ctx,
            &sql,
            Params::Positional(vec![
                Value::Text(contains_pattern(term)),
                Value::Integer(self.fresh_cutoff()),
            ]),
            row_to_syllabus,
        )
        .await
    }

    pub async fn fuzzy_search_syllabi(
        &self,
        ctx: &RequestContext,
        term: &str,
    ) -> Result<Vec<Syllabus>> {
        let chars = CharSet::new(validate_term(term)?);
        let sql = format!(
            "SELECT {SYLLABUS_COLUMNS} FROM syllabi
             WHERE cached_at > ?1
             ORDER BY year DESC, term DESC, title
             LIMIT {SYLLABUS_FUZZY_LIMIT}"
        );
        let candidates = self
            .query_all(
                ctx,
                &sql,
                Params::Positional(vec![Value::Integer(self.fresh_cutoff())]),
                row_to_syllabus,
            )
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|s| chars.is_subset_of(&s.title))
            .collect())
    }

    pub async fn save_syllabus(&self, ctx: &RequestContext, syllabus: &Syllabus) -> Result<()> {
        self.save_syllabi(ctx, std::slice::from_ref(syllabus)).await
    }

    /// Upsert syllabi in one transaction.
    pub async fn save_syllabi(&self, ctx: &RequestContext, syllabi: &[Syllabus]) -> Result<()> {
        let mut set = WriteSet::new();
        set.syllabi(syllabi)?;
        self.commit(ctx, set).await
    }
}

pub(crate) fn syllabus_values(s: &Syllabus) -> Result<Vec<Value>> {
    Ok(vec![
        text_value(&s.uid),
        Value::Integer(s.year),
        Value::Integer(s.term),
        text_value(&s.title),
        encode_list(&s.teachers)?,
        text_value(&s.objectives),
        text_value(&s.outline),
        text_value(&s.schedule),
        text_value(&s.content_hash),
        ts_value(&s.cached_at),
    ])
}

fn row_to_syllabus(row: &Row) -> Result<Syllabus> {
    Ok(Syllabus {
        uid: text(row, 0)?,
        year: int(row, 1)?,
        term: int(row, 2)?,
        title: text(row, 3)?,
        teachers: json_list(row, 4)?,
        objectives: text(row, 5)?,
        outline: text(row, 6)?,
        schedule: text(row, 7)?,
        content_hash: text(row, 8)?,
        cached_at: timestamp(row, 9)?,
    })
}
