//! Core domain types for the CampusBot cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CampusBotError, Result};

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// The entity kinds the resolver knows how to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Student,
    Contact,
    Course,
    Syllabus,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Student,
        EntityKind::Contact,
        EntityKind::Course,
        EntityKind::Syllabus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Contact => "contact",
            Self::Course => "course",
            Self::Syllabus => "syllabus",
        }
    }

    /// Whether reads of this kind apply the hard TTL.
    ///
    /// Students are permanent: their `cached_at` only records the last
    /// warmup pass.
    pub fn ttl_governed(&self) -> bool {
        !matches!(self, Self::Student)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = CampusBotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "student" | "students" => Ok(Self::Student),
            "contact" | "contacts" => Ok(Self::Contact),
            "course" | "courses" => Ok(Self::Course),
            "syllabus" | "syllabi" => Ok(Self::Syllabus),
            other => Err(CampusBotError::invalid(format!(
                "unknown entity kind: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Student
// ---------------------------------------------------------------------------

/// A student directory record. Never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    /// Enrollment year (ROC calendar on the upstream site, e.g. 112).
    pub year: i64,
    pub department: String,
    pub cached_at: DateTime<Utc>,
}

impl Student {
    /// Whether a query reads as (a prefix of) a student ID rather than a
    /// name: ASCII alphanumerics with at least one digit.
    pub fn looks_like_id(term: &str) -> bool {
        let term = term.trim();
        !term.is_empty()
            && term.chars().all(|c| c.is_ascii_alphanumeric())
            && term.chars().any(|c| c.is_ascii_digit())
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// Discriminant for [`Contact`] rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactType {
    Individual,
    Organization,
}

impl ContactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Organization => "organization",
        }
    }
}

impl std::str::FromStr for ContactType {
    type Err = CampusBotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "individual" => Ok(Self::Individual),
            "organization" => Ok(Self::Organization),
            other => Err(CampusBotError::invalid(format!(
                "unknown contact type: {other}"
            ))),
        }
    }
}

/// A directory entry: a person or an organizational unit.
///
/// `organization` and `superior` name other contacts by their `name`; the
/// store does not enforce that they exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub uid: String,
    #[serde(rename = "type")]
    pub contact_type: ContactType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superior: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub cached_at: DateTime<Utc>,
}

impl Contact {
    /// A contact with only the required fields set, stamped now.
    pub fn new(uid: impl Into<String>, contact_type: ContactType, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            contact_type,
            name: name.into(),
            name_alt: None,
            title: None,
            organization: None,
            superior: None,
            extension: None,
            phone: None,
            email: None,
            website: None,
            location: None,
            cached_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Course
// ---------------------------------------------------------------------------

/// One offering of a course in a given academic year and term.
///
/// `teacher_urls` is aligned positionally with `teachers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub uid: String,
    pub year: i64,
    /// 1 (fall) or 2 (spring).
    pub term: i64,
    pub no: String,
    pub title: String,
    #[serde(default)]
    pub teachers: Vec<String>,
    #[serde(default)]
    pub teacher_urls: Vec<String>,
    #[serde(default)]
    pub times: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub cached_at: DateTime<Utc>,
}

impl Course {
    /// `(year, term)` sort key, newest first when reversed.
    pub fn semester(&self) -> (i64, i64) {
        (self.year, self.term)
    }
}

/// Role of a course within a degree program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseType {
    Required,
    Elective,
    Optional,
}

impl CourseType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Elective => "elective",
            Self::Optional => "optional",
        }
    }

    /// Short code persisted in `program_courses.course_type`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Required => "R",
            Self::Elective => "E",
            Self::Optional => "O",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "R" => Ok(Self::Required),
            "E" => Ok(Self::Elective),
            "O" => Ok(Self::Optional),
            other => Err(CampusBotError::invalid(format!(
                "unknown course type code: {other}"
            ))),
        }
    }

    /// Map the labels used on the upstream course pages.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "必" | "必修" | "required" => Some(Self::Required),
            "選" | "選修" | "elective" => Some(Self::Elective),
            "通" | "通識" | "optional" => Some(Self::Optional),
            _ => None,
        }
    }
}

/// A `(course, program)` membership row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramCourse {
    pub course_uid: String,
    pub program_name: String,
    pub course_type: CourseType,
}

// ---------------------------------------------------------------------------
// Syllabus
// ---------------------------------------------------------------------------

/// Per-course pedagogical payload. `uid` equals the owning course's uid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Syllabus {
    pub uid: String,
    pub year: i64,
    pub term: i64,
    pub title: String,
    #[serde(default)]
    pub teachers: Vec<String>,
    #[serde(default)]
    pub objectives: String,
    #[serde(default)]
    pub outline: String,
    #[serde(default)]
    pub schedule: String,
    /// SHA-256 of the canonicalized textual payload.
    pub content_hash: String,
    pub cached_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Sticker
// ---------------------------------------------------------------------------

/// Where a sticker image URL came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickerSource {
    Spy,
    Ichigo,
    Fallback,
}

impl StickerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spy => "spy",
            Self::Ichigo => "ichigo",
            Self::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for StickerSource {
    type Err = CampusBotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "spy" => Ok(Self::Spy),
            "ichigo" => Ok(Self::Ichigo),
            "fallback" => Ok(Self::Fallback),
            other => Err(CampusBotError::invalid(format!(
                "unknown sticker source: {other}"
            ))),
        }
    }
}

/// A chat sticker image. Reads ignore TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    pub url: String,
    pub source: StickerSource,
    pub cached_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A resolved entity of any kind, as returned by the handler API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Entity {
    Student(Student),
    Contact(Contact),
    Course(Course),
    Syllabus(Syllabus),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Student(_) => EntityKind::Student,
            Self::Contact(_) => EntityKind::Contact,
            Self::Course(_) => EntityKind::Course,
            Self::Syllabus(_) => EntityKind::Syllabus,
        }
    }

    /// Primary key of the underlying row.
    pub fn key(&self) -> &str {
        match self {
            Self::Student(s) => &s.id,
            Self::Contact(c) => &c.uid,
            Self::Course(c) => &c.uid,
            Self::Syllabus(s) => &s.uid,
        }
    }

    /// Primary display text (name or title).
    pub fn label(&self) -> &str {
        match self {
            Self::Student(s) => &s.name,
            Self::Contact(c) => &c.name,
            Self::Course(c) => &c.title,
            Self::Syllabus(s) => &s.title,
        }
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        match self {
            Self::Student(s) => s.cached_at,
            Self::Contact(c) => c.cached_at,
            Self::Course(c) => c.cached_at,
            Self::Syllabus(s) => s.cached_at,
        }
    }
}
