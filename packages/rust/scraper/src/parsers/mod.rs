//! HTML parsers turning upstream pages into entities.
//!
//! Each entity kind has one parser that understands both its listing and
//! detail pages. Rows that fail to parse are logged and skipped; a page
//! whose layout is unrecognizable yields no rows rather than an error.

mod contacts;
mod courses;
mod students;
mod syllabi;

use chrono::{DateTime, Utc};
use campusbot_shared::{CampusBotError, Entity, EntityKind, Result};
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::hash::normalize_whitespace;

pub use contacts::ContactParser;
pub use courses::{CourseParser, parse_program_index, parse_program_rows};
pub use students::StudentParser;
pub use syllabi::SyllabusParser;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Entities extracted from one page.
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    pub entities: Vec<Entity>,
    /// Rows that looked like entities but could not be parsed.
    pub skipped: usize,
}

/// Parser for the pages of one entity kind.
pub trait PageParser: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Extract every entity on the page, stamping them with `fetched_at`.
    fn parse(&self, doc: &Html, page_url: &Url, fetched_at: DateTime<Utc>) -> Result<ParsedPage>;

    /// Human-readable parser name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One parser per entity kind.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn PageParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            parsers: vec![
                Box::new(StudentParser),
                Box::new(ContactParser),
                Box::new(CourseParser),
                Box::new(SyllabusParser),
            ],
        }
    }

    pub fn for_kind(&self, kind: EntityKind) -> Result<&dyn PageParser> {
        self.parsers
            .iter()
            .find(|p| p.kind() == kind)
            .map(|p| p.as_ref())
            .ok_or_else(|| CampusBotError::invalid(format!("no parser registered for {kind}")))
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| CampusBotError::parse(format!("invalid selector {css:?}: {e:?}")))
}

/// Collapsed text content of an element.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    normalize_whitespace(&el.text().collect::<String>())
}

/// Text of the first descendant matching `sel`, if any and non-empty.
pub(crate) fn child_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Like [`child_text`], but the cell is mandatory.
pub(crate) fn required_text(el: ElementRef<'_>, sel: &Selector, field: &str) -> Result<String> {
    child_text(el, sel).ok_or_else(|| CampusBotError::parse(format!("missing {field}")))
}

/// `href` of the first matching link, resolved against the page URL.
pub(crate) fn child_link(el: ElementRef<'_>, sel: &Selector, page_url: &Url) -> Option<String> {
    el.select(sel)
        .find_map(|a| a.value().attr("href"))
        .and_then(|href| page_url.join(href).ok())
        .map(String::from)
}

/// Parse a `year-term` semester label such as `113-1`.
pub(crate) fn parse_semester(label: &str) -> Result<(i64, i64)> {
    let (year, term) = label
        .trim()
        .split_once('-')
        .ok_or_else(|| CampusBotError::parse(format!("bad semester label {label:?}")))?;
    let year: i64 = year
        .trim()
        .parse()
        .map_err(|_| CampusBotError::parse(format!("bad academic year in {label:?}")))?;
    let term: i64 = term
        .trim()
        .parse()
        .map_err(|_| CampusBotError::parse(format!("bad term in {label:?}")))?;
    if !(1..=2).contains(&term) {
        return Err(CampusBotError::parse(format!("term out of range in {label:?}")));
    }
    Ok((year, term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_a_parser_per_kind() {
        let registry = ParserRegistry::new();
        for kind in EntityKind::ALL {
            assert_eq!(registry.for_kind(kind).unwrap().kind(), kind);
        }
    }

    #[test]
    fn semester_labels() {
        assert_eq!(parse_semester("113-1").unwrap(), (113, 1));
        assert_eq!(parse_semester(" 112 - 2 ").unwrap(), (112, 2));
        assert!(parse_semester("113-3").is_err());
        assert!(parse_semester("1131").is_err());
    }

    #[test]
    fn links_resolve_against_page() {
        let doc = Html::parse_fragment(r#"<div><a href="../t/9">王</a></div>"#);
        let div = doc.select(&selector("div").unwrap()).next().unwrap();
        let page = Url::parse("https://sea.example.edu/courses/1131U0001").unwrap();
        assert_eq!(
            child_link(div, &selector("a").unwrap(), &page).as_deref(),
            Some("https://sea.example.edu/t/9")
        );
    }
}
