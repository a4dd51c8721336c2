//! SQL migration definitions for the CampusBot cache database.
//!
//! Migrations are applied in order on database open. Evolution is additive:
//! later migrations only create tables/indexes or add nullable columns.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: students, contacts, courses, historical_courses, program_courses",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Students never expire; cached_at records the last warmup pass only.
CREATE TABLE IF NOT EXISTS students (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    year       INTEGER NOT NULL,
    department TEXT NOT NULL,
    cached_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_students_name ON students(name);
CREATE INDEX IF NOT EXISTS idx_students_year ON students(year);
CREATE INDEX IF NOT EXISTS idx_students_cached_at ON students(cached_at);

CREATE TABLE IF NOT EXISTS contacts (
    uid          TEXT PRIMARY KEY,
    type         TEXT NOT NULL CHECK (type IN ('individual', 'organization')),
    name         TEXT NOT NULL,
    name_alt     TEXT,
    title        TEXT,
    organization TEXT,
    superior     TEXT,
    extension    TEXT,
    phone        TEXT,
    email        TEXT,
    website      TEXT,
    location     TEXT,
    cached_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contacts_name ON contacts(name);
CREATE INDEX IF NOT EXISTS idx_contacts_organization ON contacts(organization);
CREATE INDEX IF NOT EXISTS idx_contacts_cached_at ON contacts(cached_at);

-- teachers / teacher_urls / times / locations are compact JSON arrays.
CREATE TABLE IF NOT EXISTS courses (
    uid          TEXT PRIMARY KEY,
    year         INTEGER NOT NULL,
    term         INTEGER NOT NULL CHECK (term IN (1, 2)),
    no           TEXT NOT NULL,
    title        TEXT NOT NULL,
    teachers     TEXT NOT NULL DEFAULT '[]',
    teacher_urls TEXT NOT NULL DEFAULT '[]',
    times        TEXT NOT NULL DEFAULT '[]',
    locations    TEXT NOT NULL DEFAULT '[]',
    detail_url   TEXT,
    note         TEXT,
    cached_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_courses_title ON courses(title);
CREATE INDEX IF NOT EXISTS idx_courses_semester ON courses(year, term);
CREATE INDEX IF NOT EXISTS idx_courses_cached_at ON courses(cached_at);

CREATE TABLE IF NOT EXISTS historical_courses (
    uid          TEXT PRIMARY KEY,
    year         INTEGER NOT NULL,
    term         INTEGER NOT NULL CHECK (term IN (1, 2)),
    no           TEXT NOT NULL,
    title        TEXT NOT NULL,
    teachers     TEXT NOT NULL DEFAULT '[]',
    teacher_urls TEXT NOT NULL DEFAULT '[]',
    times        TEXT NOT NULL DEFAULT '[]',
    locations    TEXT NOT NULL DEFAULT '[]',
    detail_url   TEXT,
    note         TEXT,
    cached_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_historical_courses_title ON historical_courses(title);
CREATE INDEX IF NOT EXISTS idx_historical_courses_year ON historical_courses(year);
CREATE INDEX IF NOT EXISTS idx_historical_courses_cached_at ON historical_courses(cached_at);

-- course_uid may name a row in either courses or historical_courses.
CREATE TABLE IF NOT EXISTS program_courses (
    course_uid   TEXT NOT NULL,
    program_name TEXT NOT NULL,
    course_type  TEXT NOT NULL CHECK (course_type IN ('R', 'E', 'O')),
    cached_at    INTEGER NOT NULL,
    PRIMARY KEY (course_uid, program_name)
);

CREATE INDEX IF NOT EXISTS idx_program_courses_program ON program_courses(program_name);
CREATE INDEX IF NOT EXISTS idx_program_courses_cached_at ON program_courses(cached_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Syllabi and stickers",
            sql: r#"
CREATE TABLE IF NOT EXISTS syllabi (
    uid          TEXT PRIMARY KEY,
    year         INTEGER NOT NULL,
    term         INTEGER NOT NULL,
    title        TEXT NOT NULL,
    teachers     TEXT NOT NULL DEFAULT '[]',
    objectives   TEXT NOT NULL DEFAULT '',
    outline      TEXT NOT NULL DEFAULT '',
    schedule     TEXT NOT NULL DEFAULT '',
    content_hash TEXT NOT NULL,
    cached_at    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_syllabi_title ON syllabi(title);
CREATE INDEX IF NOT EXISTS idx_syllabi_cached_at ON syllabi(cached_at);

CREATE TABLE IF NOT EXISTS stickers (
    url       TEXT PRIMARY KEY,
    source    TEXT NOT NULL CHECK (source IN ('spy', 'ichigo', 'fallback')),
    cached_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stickers_cached_at ON stickers(cached_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}

/// Latest schema version known to this build.
#[cfg(test)]
pub(crate) fn latest_version() -> u32 {
    all_migrations()
        .last()
        .map(|m| m.version)
        .unwrap_or(0)
}
