//! Course offerings, the historical archive, and program memberships.
//!
//! `courses` holds the recent window of offerings; `historical_courses` holds
//! older ones with the same shape. Both are TTL-governed. Program membership
//! rows are written replace-all per course.

use campusbot_shared::{
    CampusBotError, Course, CourseType, ProgramCourse, RequestContext, Result,
};
use chrono::Utc;
use libsql::params::Params;
use libsql::{Row, Value};

use crate::search::{CharSet, contains_pattern, validate_term};
use crate::writeset::WriteSet;
use crate::{
    SEARCH_LIMIT, Store, encode_list, int, json_list, opt_text, opt_value, text, text_value,
    timestamp, ts_value,
};

/// Row cap for the fuzzy title scan.
pub const COURSE_FUZZY_LIMIT: usize = 2000;

/// Number of distinct semesters considered "recent".
pub const RECENT_SEMESTERS: usize = 2;

const COURSE_COLUMNS: &str = "uid, year, term, no, title, teachers, teacher_urls, times, \
     locations, detail_url, note, cached_at";

pub(crate) const UPSERT_COURSE: &str = "INSERT INTO courses (uid, year, term, no, title, teachers,
       teacher_urls, times, locations, detail_url, note, cached_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
     ON CONFLICT(uid) DO UPDATE SET
       year = excluded.year,
       term = excluded.term,
       no = excluded.no,
       title = excluded.title,
       teachers = excluded.teachers,
       teacher_urls = excluded.teacher_urls,
       times = excluded.times,
       locations = excluded.locations,
       detail_url = excluded.detail_url,
       note = excluded.note,
       cached_at = excluded.cached_at";

pub(crate) const UPSERT_HISTORICAL_COURSE: &str = "INSERT INTO historical_courses (uid, year, term, no,
       title, teachers, teacher_urls, times, locations, detail_url, note, cached_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
     ON CONFLICT(uid) DO UPDATE SET
       year = excluded.year,
       term = excluded.term,
       no = excluded.no,
       title = excluded.title,
       teachers = excluded.teachers,
       teacher_urls = excluded.teacher_urls,
       times = excluded.times,
       locations = excluded.locations,
       detail_url = excluded.detail_url,
       note = excluded.note,
       cached_at = excluded.cached_at";

const DELETE_COURSE_PROGRAMS: &str = "DELETE FROM program_courses WHERE course_uid = ?1";

const INSERT_COURSE_PROGRAM: &str = "INSERT INTO program_courses
       (course_uid, program_name, course_type, cached_at)
     VALUES (?1, ?2, ?3, ?4)";

impl Store {
    // -----------------------------------------------------------------------
    // Recent courses
    // -----------------------------------------------------------------------

    /// Get a live course by UID.
    pub async fn get_course(&self, ctx: &RequestContext, uid: &str) -> Result<Course> {
        let sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE uid = ?1 AND cached_at > ?2");
        self.query_one(
            ctx,
            &sql,
            Params::Positional(vec![text_value(uid), Value::Integer(self.fresh_cutoff())]),
            row_to_course,
        )
        .await?
        .ok_or_else(|| CampusBotError::not_found("course", uid))
    }

    /// Live courses whose title contains `term`, newest semester first.
    pub async fn search_courses(&self, ctx: &RequestContext, term: &str) -> Result<Vec<Course>> {
        let term = validate_term(term)?;
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses
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
            row_to_course,
        )
        .await
    }

    /// Live courses taught by someone whose name contains `name`.
    pub async fn search_courses_by_teacher(
        &self,
        ctx: &RequestContext,
        name: &str,
    ) -> Result<Vec<Course>> {
        let name = validate_term(name)?;
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses
             WHERE teachers LIKE ?1 ESCAPE '\\' AND cached_at > ?2
             ORDER BY year DESC, term DESC, title
             LIMIT {SEARCH_LIMIT}"
        );
        let candidates = self
            .query_all(
                ctx,
                &sql,
                Params::Positional(vec![
                    Value::Text(contains_pattern(name)),
                    Value::Integer(self.fresh_cutoff()),
                ]),
                row_to_course,
            )
            .await?;
        // The LIKE runs over the JSON text; keep only real per-teacher hits.
        Ok(candidates
            .into_iter()
            .filter(|c| c.teachers.iter().any(|t| t.contains(name)))
            .collect())
    }

    /// Live courses whose title contains every code point of `term`.
    pub async fn fuzzy_search_courses(
        &self,
        ctx: &RequestContext,
        term: &str,
    ) -> Result<Vec<Course>> {
        let chars = CharSet::new(validate_term(term)?);
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses
             WHERE cached_at > ?1
             ORDER BY year DESC, term DESC, title
             LIMIT {COURSE_FUZZY_LIMIT}"
        );
        let candidates = self
            .query_all(
                ctx,
                &sql,
                Params::Positional(vec![Value::Integer(self.fresh_cutoff())]),
                row_to_course,
            )
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|c| chars.is_subset_of(&c.title))
            .collect())
    }

    /// The `n` newest distinct `(year, term)` pairs among live courses.
    pub async fn recent_semesters(
        &self,
        ctx: &RequestContext,
        n: usize,
    ) -> Result<Vec<(i64, i64)>> {
        self.query_all(
            ctx,
            "SELECT DISTINCT year, term FROM courses
             WHERE cached_at > ?1
             ORDER BY year DESC, term DESC
             LIMIT ?2",
            Params::Positional(vec![
                Value::Integer(self.fresh_cutoff()),
                Value::Integer(n as i64),
            ]),
            |row| Ok((int(row, 0)?, int(row, 1)?)),
        )
        .await
    }

    /// Live courses offered in any of `semesters`.
    pub async fn courses_in_semesters(
        &self,
        ctx: &RequestContext,
        semesters: &[(i64, i64)],
    ) -> Result<Vec<Course>> {
        if semesters.is_empty() {
            return Ok(Vec::new());
        }
        let mut values = vec![Value::Integer(self.fresh_cutoff())];
        let mut clauses = Vec::with_capacity(semesters.len());
        for (year, term) in semesters {
            let base = values.len();
            clauses.push(format!("(year = ?{} AND term = ?{})", base + 1, base + 2));
            values.push(Value::Integer(*year));
            values.push(Value::Integer(*term));
        }
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM courses
             WHERE cached_at > ?1 AND ({})
             ORDER BY year DESC, term DESC, title
             LIMIT {SEARCH_LIMIT}",
            clauses.join(" OR ")
        );
        self.query_all(ctx, &sql, Params::Positional(values), row_to_course)
            .await
    }

    /// Live courses of the most recent semesters.
    pub async fn recent_courses(&self, ctx: &RequestContext) -> Result<Vec<Course>> {
        let semesters = self.recent_semesters(ctx, RECENT_SEMESTERS).await?;
        self.courses_in_semesters(ctx, &semesters).await
    }

    /// Upsert a single course.
    pub async fn save_course(&self, ctx: &RequestContext, course: &Course) -> Result<()> {
        self.save_courses(ctx, std::slice::from_ref(course)).await
    }

    /// Upsert courses in one transaction.
    pub async fn save_courses(&self, ctx: &RequestContext, courses: &[Course]) -> Result<()> {
        let mut set = WriteSet::new();
        set.courses(courses)?;
        self.commit(ctx, set).await
    }

    // -----------------------------------------------------------------------
    // Historical courses
    // -----------------------------------------------------------------------

    pub async fn get_historical_course(&self, ctx: &RequestContext, uid: &str) -> Result<Course> {
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM historical_courses WHERE uid = ?1 AND cached_at > ?2"
        );
        self.query_one(
            ctx,
            &sql,
            Params::Positional(vec![text_value(uid), Value::Integer(self.fresh_cutoff())]),
            row_to_course,
        )
        .await?
        .ok_or_else(|| CampusBotError::not_found("historical course", uid))
    }

    /// Archived courses whose title contains `term`, optionally limited to
    /// one academic year.
    pub async fn search_historical_courses(
        &self,
        ctx: &RequestContext,
        term: &str,
        year: Option<i64>,
    ) -> Result<Vec<Course>> {
        let term = validate_term(term)?;
        let mut values = vec![
            Value::Text(contains_pattern(term)),
            Value::Integer(self.fresh_cutoff()),
        ];
        let year_clause = match year {
            Some(y) => {
                values.push(Value::Integer(y));
                " AND year = ?3"
            }
            None => "",
        };
        let sql = format!(
            "SELECT {COURSE_COLUMNS} FROM historical_courses
             WHERE title LIKE ?1 ESCAPE '\\' AND cached_at > ?2{year_clause}
             ORDER BY year DESC, term DESC, title
             LIMIT {SEARCH_LIMIT}"
        );
        self.query_all(ctx, &sql, Params::Positional(values), row_to_course)
            .await
    }

    pub async fn save_historical_courses(
        &self,
        ctx: &RequestContext,
        courses: &[Course],
    ) -> Result<()> {
        let mut set = WriteSet::new();
        set.historical_courses(courses)?;
        self.commit(ctx, set).await
    }

    // -----------------------------------------------------------------------
    // Program memberships
    // -----------------------------------------------------------------------

    /// Replace every program row of `course_uid` with `programs`, atomically.
    pub async fn replace_course_programs(
        &self,
        ctx: &RequestContext,
        course_uid: &str,
        programs: &[ProgramCourse],
    ) -> Result<()> {
        if let Some(stray) = programs.iter().find(|p| p.course_uid != course_uid) {
            return Err(CampusBotError::invalid(format!(
                "program row for {} passed while replacing {course_uid}",
                stray.course_uid
            )));
        }

        let now = Utc::now().timestamp();
        let mut statements = Vec::with_capacity(programs.len() + 1);
        statements.push((DELETE_COURSE_PROGRAMS, vec![text_value(course_uid)]));
        for p in programs {
            statements.push((
                INSERT_COURSE_PROGRAM,
                vec![
                    text_value(course_uid),
                    text_value(&p.program_name),
                    text_value(p.course_type.code()),
                    Value::Integer(now),
                ],
            ));
        }
        self.write_statements(ctx, statements).await
    }

    /// Live program memberships of a course, by program name.
    pub async fn programs_for_course(
        &self,
        ctx: &RequestContext,
        course_uid: &str,
    ) -> Result<Vec<ProgramCourse>> {
        self.query_all(
            ctx,
            "SELECT course_uid, program_name, course_type FROM program_courses
             WHERE course_uid = ?1 AND cached_at > ?2
             ORDER BY program_name",
            Params::Positional(vec![
                text_value(course_uid),
                Value::Integer(self.fresh_cutoff()),
            ]),
            |row| {
                Ok(ProgramCourse {
                    course_uid: text(row, 0)?,
                    program_name: text(row, 1)?,
                    course_type: CourseType::from_code(&text(row, 2)?)?,
                })
            },
        )
        .await
    }

    /// Live courses belonging to a program, with their role in it. Archived
    /// offerings are included after the recent ones.
    pub async fn courses_for_program(
        &self,
        ctx: &RequestContext,
        program_name: &str,
    ) -> Result<Vec<(Course, CourseType)>> {
        let program_name = validate_term(program_name)?;
        let columns = COURSE_COLUMNS
            .split(", ")
            .map(|c| format!("c.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns}, p.course_type
             FROM program_courses p
             JOIN (SELECT {COURSE_COLUMNS} FROM courses
                   UNION ALL
                   SELECT {COURSE_COLUMNS} FROM historical_courses) c
               ON c.uid = p.course_uid
             WHERE p.program_name = ?1 AND p.cached_at > ?2 AND c.cached_at > ?2
             ORDER BY c.year DESC, c.term DESC, c.title
             LIMIT {SEARCH_LIMIT}"
        );
        self.query_all(
            ctx,
            &sql,
            Params::Positional(vec![
                text_value(program_name),
                Value::Integer(self.fresh_cutoff()),
            ]),
            |row| Ok((row_to_course(row)?, CourseType::from_code(&text(row, 12)?)?)),
        )
        .await
    }
}

pub(crate) fn course_values(c: &Course) -> Result<Vec<Value>> {
    if !c.teacher_urls.is_empty() && c.teacher_urls.len() != c.teachers.len() {
        return Err(CampusBotError::invalid(format!(
            "course {}: {} teacher URLs for {} teachers",
            c.uid,
            c.teacher_urls.len(),
            c.teachers.len()
        )));
    }
    Ok(vec![
        text_value(&c.uid),
        Value::Integer(c.year),
        Value::Integer(c.term),
        text_value(&c.no),
        text_value(&c.title),
        encode_list(&c.teachers)?,
        encode_list(&c.teacher_urls)?,
        encode_list(&c.times)?,
        encode_list(&c.locations)?,
        opt_value(&c.detail_url),
        opt_value(&c.note),
        ts_value(&c.cached_at),
    ])
}

fn row_to_course(row: &Row) -> Result<Course> {
    Ok(Course {
        uid: text(row, 0)?,
        year: int(row, 1)?,
        term: int(row, 2)?,
        no: text(row, 3)?,
        title: text(row, 4)?,
        teachers: json_list(row, 5)?,
        teacher_urls: json_list(row, 6)?,
        times: json_list(row, 7)?,
        locations: json_list(row, 8)?,
        detail_url: opt_text(row, 9),
        note: opt_text(row, 10),
        cached_at: timestamp(row, 11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use campusbot_shared::ErrorKind;

    fn course(uid: &str, year: i64, term: i64, title: &str) -> Course {
        Course {
            uid: uid.into(),
            year,
            term,
            no: format!("No.{uid}"),
            title: title.into(),
            teachers: vec!["王大明".into(), "李小華".into()],
            teacher_urls: vec![
                "https://example.edu/t/1".into(),
                "https://example.edu/t/2".into(),
            ],
            times: vec!["一2".into(), "一3".into(), "三4".into()],
            locations: vec!["資訊大樓 101".into()],
            detail_url: Some(format!("https://example.edu/course/{uid}")),
            note: None,
            cached_at: now_secs(),
        }
    }

    #[tokio::test]
    async fn course_roundtrip_keeps_array_order() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        let mut c = course("1131U0001", 113, 1, "資料結構");
        c.times = vec!["五9".into(), "一1".into(), "三5".into()];
        c.note = Some("英語授課".into());

        store.save_course(&ctx, &c).await.expect("save");
        let found = store.get_course(&ctx, "1131U0001").await.expect("get");
        assert_eq!(found, c);
    }

    #[tokio::test]
    async fn expired_course_is_absent() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        let mut c = course("1121U0002", 112, 1, "演算法");
        c.cached_at = days_ago(8);
        store.save_course(&ctx, &c).await.unwrap();

        let err = store.get_course(&ctx, "1121U0002").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(store.search_courses(&ctx, "演算").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_orders_newest_semester_first() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        store
            .save_courses(
                &ctx,
                &[
                    course("a", 112, 2, "計算機程式設計"),
                    course("b", 113, 1, "計算機程式設計"),
                    course("c", 112, 1, "計算機概論"),
                ],
            )
            .await
            .unwrap();

        let results = store.search_courses(&ctx, "計算機").await.unwrap();
        let uids: Vec<&str> = results.iter().map(|c| c.uid.as_str()).collect();
        assert_eq!(uids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn batch_with_bad_row_commits_nothing() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        let good = course("ok", 113, 1, "線性代數");
        let bad = course("bad", 113, 3, "微積分");

        let err = store.save_courses(&ctx, &[good, bad]).await;
        assert!(err.is_err());
        assert!(store.get_course(&ctx, "ok").await.is_err());
        assert!(store.search_courses(&ctx, "線性").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn misaligned_teacher_urls_are_rejected() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        let mut c = course("x", 113, 1, "作業系統");
        c.teacher_urls.pop();
        let err = store.save_course(&ctx, &c).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn teacher_and_fuzzy_search() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        let mut other = course("b", 113, 1, "計算機網路");
        other.teachers = vec!["陳一".into()];
        other.teacher_urls.clear();
        store
            .save_courses(&ctx, &[course("a", 113, 1, "資料庫系統"), other])
            .await
            .unwrap();

        let by_teacher = store.search_courses_by_teacher(&ctx, "小華").await.unwrap();
        assert_eq!(by_teacher.len(), 1);
        assert_eq!(by_teacher[0].uid, "a");

        let fuzzy = store.fuzzy_search_courses(&ctx, "網計").await.unwrap();
        assert_eq!(fuzzy.len(), 1);
        assert_eq!(fuzzy[0].uid, "b");
    }

    #[tokio::test]
    async fn recent_semesters_are_two_newest_pairs() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        store
            .save_courses(
                &ctx,
                &[
                    course("a", 112, 1, "甲"),
                    course("b", 112, 2, "乙"),
                    course("c", 113, 1, "丙"),
                    course("d", 113, 1, "丁"),
                ],
            )
            .await
            .unwrap();

        let semesters = store.recent_semesters(&ctx, 2).await.unwrap();
        assert_eq!(semesters, vec![(113, 1), (112, 2)]);

        let recent = store.recent_courses(&ctx).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent.iter().all(|c| c.uid != "a"));
    }

    #[tokio::test]
    async fn historical_search_filters_by_year() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        store
            .save_historical_courses(
                &ctx,
                &[course("h1", 105, 1, "離散數學"), course("h2", 106, 2, "離散數學")],
            )
            .await
            .unwrap();

        assert_eq!(
            store.search_historical_courses(&ctx, "離散", None).await.unwrap().len(),
            2
        );
        let only = store
            .search_historical_courses(&ctx, "離散", Some(106))
            .await
            .unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].uid, "h2");
        assert!(store.get_historical_course(&ctx, "h1").await.is_ok());
        assert!(store.get_course(&ctx, "h1").await.is_err());
    }

    #[tokio::test]
    async fn program_rows_are_replaced_wholesale() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        store
            .save_course(&ctx, &course("c1", 113, 1, "資料結構"))
            .await
            .unwrap();

        let row = |program: &str, course_type| ProgramCourse {
            course_uid: "c1".into(),
            program_name: program.into(),
            course_type,
        };
        store
            .replace_course_programs(
                &ctx,
                "c1",
                &[
                    row("資訊工程學系", CourseType::Required),
                    row("人工智慧學程", CourseType::Elective),
                ],
            )
            .await
            .unwrap();
        store
            .replace_course_programs(&ctx, "c1", &[row("資訊工程學系", CourseType::Elective)])
            .await
            .unwrap();

        let programs = store.programs_for_course(&ctx, "c1").await.unwrap();
        assert_eq!(programs, vec![row("資訊工程學系", CourseType::Elective)]);

        let courses = store
            .courses_for_program(&ctx, "資訊工程學系")
            .await
            .unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].0.uid, "c1");
        assert_eq!(courses[0].1, CourseType::Elective);
    }

    #[tokio::test]
    async fn program_rows_for_archived_course_are_stored() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        store
            .save_historical_courses(&ctx, &[course("old1", 105, 1, "數位邏輯")])
            .await
            .unwrap();

        let rows = [ProgramCourse {
            course_uid: "old1".into(),
            program_name: "電機工程學系".into(),
            course_type: CourseType::Required,
        }];
        store.replace_course_programs(&ctx, "old1", &rows).await.unwrap();

        assert_eq!(store.programs_for_course(&ctx, "old1").await.unwrap(), rows);
        let courses = store
            .courses_for_program(&ctx, "電機工程學系")
            .await
            .unwrap();
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].0.uid, "old1");
    }

    #[tokio::test]
    async fn program_rows_for_another_course_are_rejected() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        let rows = [ProgramCourse {
            course_uid: "c2".into(),
            program_name: "資訊工程學系".into(),
            course_type: CourseType::Required,
        }];

        let err = store
            .replace_course_programs(&ctx, "c1", &rows)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(store.programs_for_course(&ctx, "c2").await.unwrap().is_empty());
    }
}
