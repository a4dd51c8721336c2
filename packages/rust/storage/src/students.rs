//! Student rows. Permanent: reads never consult `cached_at`.

use campusbot_shared::{CampusBotError, RequestContext, Result, Student};
use libsql::params::Params;
use libsql::{Row, Value};

use crate::search::{CharSet, contains_pattern, prefix_pattern, validate_term};
use crate::writeset::WriteSet;
use crate::{SEARCH_LIMIT, Store, int, text, text_value, timestamp, ts_value};

/// Row cap for the fuzzy name scan.
pub const STUDENT_FUZZY_LIMIT: usize = 3000;

const STUDENT_COLUMNS: &str = "id, name, year, department, cached_at";

pub(crate) const UPSERT_STUDENT: &str = "INSERT INTO students (id, name, year, department, cached_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(id) DO UPDATE SET
       name = excluded.name,
       year = excluded.year,
       department = excluded.department,
       cached_at = excluded.cached_at";

impl Store {
    /// Get a student by ID.
    pub async fn get_student(&self, ctx: &RequestContext, id: &str) -> Result<Student> {
        let id = validate_student_id(id)?;
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1");
        self.query_one(ctx, &sql, Params::Positional(vec![text_value(id)]), row_to_student)
            .await?
            .ok_or_else(|| CampusBotError::not_found("student", id))
    }

    /// Students whose name contains `term`, newest cohort first.
    pub async fn search_students_by_name(
        &self,
        ctx: &RequestContext,
        term: &str,
    ) -> Result<Vec<Student>> {
        let term = validate_term(term)?;
        let sql = format!(
            "SELECT {STUDENT_COLUMNS} FROM students
             WHERE name LIKE ?1 ESCAPE '\\'
             ORDER BY year DESC, id
             LIMIT {SEARCH_LIMIT}"
        );
        self.query_all(
            ctx,
            &sql,
            Params::Positional(vec![Value::Text(contains_pattern(term))]),
            row_to_student,
        )
        .await
    }

    /// Students whose ID starts with `prefix` (e.g. a cohort + department code).
    pub async fn search_students_by_id_prefix(
        &self,
        ctx: &RequestContext,
        prefix: &str,
    ) -> Result<Vec<Student>> {
        let prefix = validate_term(prefix)?;
        let sql = format!(
            "SELECT {STUDENT_COLUMNS} FROM students
             WHERE id LIKE ?1 ESCAPE '\\'
             ORDER BY id
             LIMIT {SEARCH_LIMIT}"
        );
        self.query_all(
            ctx,
            &sql,
            Params::Positional(vec![Value::Text(prefix_pattern(prefix))]),
            row_to_student,
        )
        .await
    }

    /// Students whose name contains every code point of `term`.
    pub async fn fuzzy_search_students(
        &self,
        ctx: &RequestContext,
        term: &str,
    ) -> Result<Vec<Student>> {
        let chars = CharSet::new(validate_term(term)?);
        let sql = format!(
            "SELECT {STUDENT_COLUMNS} FROM students
             ORDER BY year DESC, id
             LIMIT {STUDENT_FUZZY_LIMIT}"
        );
        let candidates = self.query_all(ctx, &sql, Params::None, row_to_student).await?;
        Ok(candidates
            .into_iter()
            .filter(|s| chars.is_subset_of(&s.name))
            .collect())
    }

    /// Upsert a single student.
    pub async fn save_student(&self, ctx: &RequestContext, student: &Student) -> Result<()> {
        self.save_students(ctx, std::slice::from_ref(student)).await
    }

    /// Upsert students in one transaction.
    pub async fn save_students(&self, ctx: &RequestContext, students: &[Student]) -> Result<()> {
        let mut set = WriteSet::new();
        set.students(students)?;
        self.commit(ctx, set).await
    }

    pub async fn count_students(&self, ctx: &RequestContext) -> Result<u64> {
        self.query_count(ctx, "SELECT COUNT(*) FROM students", Params::None)
            .await
    }
}

fn validate_student_id(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() || id.chars().count() > 16 || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(CampusBotError::invalid(format!("malformed student id: {id:?}")));
    }
    Ok(id)
}

pub(crate) fn student_values(s: &Student) -> Result<Vec<Value>> {
    validate_student_id(&s.id)?;
    Ok(vec![
        text_value(&s.id),
        text_value(&s.name),
        Value::Integer(s.year),
        text_value(&s.department),
        ts_value(&s.cached_at),
    ])
}

fn row_to_student(row: &Row) -> Result<Student> {
    Ok(Student {
        id: text(row, 0)?,
        name: text(row, 1)?,
        year: int(row, 2)?,
        department: text(row, 3)?,
        cached_at: timestamp(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn student(id: &str, name: &str, year: i64) -> Student {
        Student {
            id: id.into(),
            name: name.into(),
            year,
            department: "資訊工程學系".into(),
            cached_at: now_secs(),
        }
    }

    #[tokio::test]
    async fn student_roundtrip() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        let s = student("411234567", "王小明", 111);

        store.save_student(&ctx, &s).await.expect("save");
        let found = store.get_student(&ctx, "411234567").await.expect("get");
        assert_eq!(found, s);
    }

    #[tokio::test]
    async fn students_ignore_ttl() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        let mut s = student("410000001", "陳大文", 100);
        s.cached_at = days_ago(365);

        store.save_student(&ctx, &s).await.unwrap();
        assert!(store.get_student(&ctx, "410000001").await.is_ok());
        assert_eq!(store.search_students_by_name(&ctx, "大文").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn prefix_and_name_search() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        store
            .save_students(
                &ctx,
                &[
                    student("411100001", "林一", 111),
                    student("411100002", "林二", 111),
                    student("412200001", "張三", 112),
                ],
            )
            .await
            .unwrap();

        let cohort = store.search_students_by_id_prefix(&ctx, "4111").await.unwrap();
        assert_eq!(cohort.len(), 2);

        let by_name = store.search_students_by_name(&ctx, "林").await.unwrap();
        assert_eq!(by_name.len(), 2);

        let fuzzy = store.fuzzy_search_students(&ctx, "三張").await.unwrap();
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].id, "412200001");

        assert_eq!(store.count_students(&ctx).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn malformed_id_is_invalid_argument() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        let err = store.get_student(&ctx, "41'; DROP").await.unwrap_err();
        assert_eq!(err.kind(), campusbot_shared::ErrorKind::InvalidArgument);

        let err = store.get_student(&ctx, "499999999").await.unwrap_err();
        assert_eq!(err.kind(), campusbot_shared::ErrorKind::NotFound);
    }
}
