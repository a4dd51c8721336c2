//! Course listings, course detail pages, and program membership tables.

use chrono::{DateTime, Utc};
use campusbot_shared::{CampusBotError, Course, CourseType, Entity, EntityKind, Result};
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use super::{
    PageParser, ParsedPage, child_link, child_text, element_text, parse_semester, required_text,
    selector,
};

/// Parses `tr.course[data-uid]` rows. Listing and detail pages share the
/// row layout; detail pages add a `table.programs`.
pub struct CourseParser;

struct Cells {
    semester: Selector,
    no: Selector,
    title: Selector,
    title_link: Selector,
    teachers: Selector,
    teacher_items: Selector,
    times: Selector,
    locations: Selector,
    note: Selector,
}

impl Cells {
    fn new() -> Result<Self> {
        Ok(Self {
            semester: selector("td.semester")?,
            no: selector("td.no")?,
            title: selector("td.title")?,
            title_link: selector("td.title a[href]")?,
            teachers: selector("td.teachers")?,
            teacher_items: selector("a, span")?,
            times: selector("td.times span, td.times li")?,
            locations: selector("td.locations span, td.locations li")?,
            note: selector("td.note")?,
        })
    }
}

impl PageParser for CourseParser {
    fn kind(&self) -> EntityKind {
        EntityKind::Course
    }

    fn parse(&self, doc: &Html, page_url: &Url, fetched_at: DateTime<Utc>) -> Result<ParsedPage> {
        let rows = selector("tr.course")?;
        let cells = Cells::new()?;

        let mut page = ParsedPage::default();
        for row in doc.select(&rows) {
            match parse_row(row, &cells, page_url, fetched_at) {
                Ok(course) => page.entities.push(Entity::Course(course)),
                Err(e) => {
                    warn!(parser = self.name(), error = %e, "skipping course row");
                    page.skipped += 1;
                }
            }
        }
        Ok(page)
    }

    fn name(&self) -> &str {
        "courses"
    }
}

fn parse_row(
    row: ElementRef<'_>,
    cells: &Cells,
    page_url: &Url,
    fetched_at: DateTime<Utc>,
) -> Result<Course> {
    let uid = row
        .value()
        .attr("data-uid")
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| CampusBotError::parse("course row without data-uid"))?;
    let (year, term) = parse_semester(&required_text(row, &cells.semester, "semester")?)
        .map_err(|e| CampusBotError::parse(format!("course {uid}: {e}")))?;
    let (teachers, teacher_urls) = parse_teachers(row, cells, page_url);

    Ok(Course {
        uid: uid.to_string(),
        year,
        term,
        no: child_text(row, &cells.no).unwrap_or_default(),
        title: required_text(row, &cells.title, "course title")?,
        teachers,
        teacher_urls,
        times: list_items(row, &cells.times),
        locations: list_items(row, &cells.locations),
        detail_url: child_link(row, &cells.title_link, page_url),
        note: child_text(row, &cells.note),
        cached_at: fetched_at,
    })
}

/// Teacher names in order, with profile links aligned by position. The URL
/// list is empty when no teacher has a link.
fn parse_teachers(row: ElementRef<'_>, cells: &Cells, page_url: &Url) -> (Vec<String>, Vec<String>) {
    let Some(cell) = row.select(&cells.teachers).next() else {
        return (Vec::new(), Vec::new());
    };

    let mut names = Vec::new();
    let mut urls = Vec::new();
    for item in cell.select(&cells.teacher_items) {
        let name = element_text(item);
        if name.is_empty() {
            continue;
        }
        let url = item
            .value()
            .attr("href")
            .and_then(|href| page_url.join(href).ok())
            .map(String::from)
            .unwrap_or_default();
        names.push(name);
        urls.push(url);
    }

    if names.is_empty() {
        // Plain-text cell: "王大明、李小華".
        names = element_text(cell)
            .split(['、', ',', '，'])
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect();
        urls.clear();
    }

    if urls.iter().all(String::is_empty) {
        urls.clear();
    }
    (names, urls)
}

fn list_items(row: ElementRef<'_>, sel: &Selector) -> Vec<String> {
    row.select(sel)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Program membership rows on a course detail page: `(program name, role)`.
///
/// Rows whose role label is not recognized are skipped.
pub fn parse_program_rows(doc: &Html) -> Result<Vec<(String, CourseType)>> {
    let rows = selector("table.programs tr.program")?;
    let name = selector("td.name")?;
    let kind = selector("td.type")?;

    let mut programs = Vec::new();
    for row in doc.select(&rows) {
        let Some(program) = child_text(row, &name) else {
            continue;
        };
        let label = child_text(row, &kind).unwrap_or_default();
        match CourseType::from_label(&label) {
            Some(course_type) => programs.push((program, course_type)),
            None => warn!(program = %program, label = %label, "unknown course type label"),
        }
    }
    Ok(programs)
}

/// Canonical program names from the program index page.
pub fn parse_program_index(doc: &Html) -> Result<Vec<String>> {
    let items = selector("ul.programs li")?;
    Ok(doc
        .select(&items)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect())
}
