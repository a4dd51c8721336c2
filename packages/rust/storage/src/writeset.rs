//! Multi-table write batches.
//!
//! A [`WriteSet`] collects encoded upserts for several tables and
//! [`Store::commit`] applies all of them in one write transaction: either
//! every row lands or none does.

use campusbot_shared::{Contact, Course, RequestContext, Result, Student, Sticker, Syllabus};
use libsql::Value;

use crate::Store;
use crate::contacts::{UPSERT_CONTACT, contact_values};
use crate::courses::{UPSERT_COURSE, UPSERT_HISTORICAL_COURSE, course_values};
use crate::stickers::{UPSERT_STICKER, sticker_values};
use crate::students::{UPSERT_STUDENT, student_values};
use crate::syllabi::{UPSERT_SYLLABUS, syllabus_values};

type Rows = Vec<Vec<Value>>;

/// Encoded rows waiting to be committed together.
///
/// Rows are validated when added, so a set that builds without error only
/// fails to commit on database errors.
#[derive(Debug, Default)]
pub struct WriteSet {
    students: Rows,
    contacts: Rows,
    courses: Rows,
    historical_courses: Rows,
    syllabi: Rows,
    stickers: Rows,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn students(&mut self, students: &[Student]) -> Result<&mut Self> {
        for s in students {
            self.students.push(student_values(s)?);
        }
        Ok(self)
    }

    pub fn contacts(&mut self, contacts: &[Contact]) -> &mut Self {
        self.contacts.extend(contacts.iter().map(contact_values));
        self
    }

    /// Courses of the recent window.
    pub fn courses(&mut self, courses: &[Course]) -> Result<&mut Self> {
        for c in courses {
            self.courses.push(course_values(c)?);
        }
        Ok(self)
    }

    /// Courses for the archive table.
    pub fn historical_courses(&mut self, courses: &[Course]) -> Result<&mut Self> {
        for c in courses {
            self.historical_courses.push(course_values(c)?);
        }
        Ok(self)
    }

    pub fn syllabi(&mut self, syllabi: &[Syllabus]) -> Result<&mut Self> {
        for s in syllabi {
            self.syllabi.push(syllabus_values(s)?);
        }
        Ok(self)
    }

    pub fn stickers(&mut self, stickers: &[Sticker]) -> &mut Self {
        self.stickers.extend(stickers.iter().map(sticker_values));
        self
    }

    /// Total rows across all tables.
    pub fn len(&self) -> usize {
        self.students.len()
            + self.contacts.len()
            + self.courses.len()
            + self.historical_courses.len()
            + self.syllabi.len()
            + self.stickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_groups(self) -> Vec<(&'static str, Rows)> {
        [
            (UPSERT_STUDENT, self.students),
            (UPSERT_CONTACT, self.contacts),
            (UPSERT_COURSE, self.courses),
            (UPSERT_HISTORICAL_COURSE, self.historical_courses),
            (UPSERT_SYLLABUS, self.syllabi),
            (UPSERT_STICKER, self.stickers),
        ]
        .into_iter()
        .filter(|(_, rows)| !rows.is_empty())
        .collect()
    }
}

impl Store {
    /// Apply every row of `set` in one write transaction.
    pub async fn commit(&self, ctx: &RequestContext, set: WriteSet) -> Result<()> {
        let rows = set.len();
        self.write_groups(ctx, set.into_groups()).await?;
        tracing::trace!(rows, "write set committed");
        Ok(())
    }
}
