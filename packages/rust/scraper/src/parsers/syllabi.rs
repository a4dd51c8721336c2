//! Syllabus pages. Search results repeat the detail block once per hit.

use chrono::{DateTime, Utc};
use campusbot_shared::{CampusBotError, Entity, EntityKind, Result, Syllabus};
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use super::{PageParser, ParsedPage, child_text, element_text, parse_semester, required_text, selector};
use crate::hash::compute_content_hash;

/// Parses `div.syllabus[data-uid]` blocks.
pub struct SyllabusParser;

struct Parts {
    title: Selector,
    semester: Selector,
    teachers: Selector,
    objectives: Selector,
    outline: Selector,
    schedule: Selector,
}

impl PageParser for SyllabusParser {
    fn kind(&self) -> EntityKind {
        EntityKind::Syllabus
    }

    fn parse(&self, doc: &Html, _page_url: &Url, fetched_at: DateTime<Utc>) -> Result<ParsedPage> {
        let blocks = selector("div.syllabus")?;
        let parts = Parts {
            title: selector(".title")?,
            semester: selector(".semester")?,
            teachers: selector(".teachers li")?,
            objectives: selector(".objectives")?,
            outline: selector(".outline")?,
            schedule: selector(".schedule")?,
        };

        let mut page = ParsedPage::default();
        for block in doc.select(&blocks) {
            match parse_block(block, &parts, fetched_at) {
                Ok(syllabus) => page.entities.push(Entity::Syllabus(syllabus)),
                Err(e) => {
                    warn!(parser = self.name(), error = %e, "skipping syllabus block");
                    page.skipped += 1;
                }
            }
        }
        Ok(page)
    }

    fn name(&self) -> &str {
        "syllabi"
    }
}

fn parse_block(block: ElementRef<'_>, parts: &Parts, fetched_at: DateTime<Utc>) -> Result<Syllabus> {
    let uid = block
        .value()
        .attr("data-uid")
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| CampusBotError::parse("syllabus block without data-uid"))?;
    let (year, term) = parse_semester(&required_text(block, &parts.semester, "semester")?)?;
    let title = required_text(block, &parts.title, "syllabus title")?;
    let teachers: Vec<String> = block
        .select(&parts.teachers)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect();
    let objectives = child_text(block, &parts.objectives).unwrap_or_default();
    let outline = child_text(block, &parts.outline).unwrap_or_default();
    let schedule = child_text(block, &parts.schedule).unwrap_or_default();

    let teacher_list = teachers.join("、");
    let content_hash =
        compute_content_hash(&[&title, &teacher_list, &objectives, &outline, &schedule]);

    Ok(Syllabus {
        uid: uid.to_string(),
        year,
        term,
        title,
        teachers,
        objectives,
        outline,
        schedule,
        content_hash,
        cached_at: fetched_at,
    })
}
