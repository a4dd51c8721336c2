//! Student directory search results.

use chrono::{DateTime, Utc};
use campusbot_shared::{CampusBotError, Entity, EntityKind, Result, Student};
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use super::{PageParser, ParsedPage, required_text, selector};

/// Parses `tr.student` rows with `id`, `name`, `year` and `department` cells.
pub struct StudentParser;

struct Cells {
    id: Selector,
    name: Selector,
    year: Selector,
    department: Selector,
}

impl PageParser for StudentParser {
    fn kind(&self) -> EntityKind {
        EntityKind::Student
    }

    fn parse(&self, doc: &Html, _page_url: &Url, fetched_at: DateTime<Utc>) -> Result<ParsedPage> {
        let rows = selector("tr.student")?;
        let cells = Cells {
            id: selector("td.id")?,
            name: selector("td.name")?,
            year: selector("td.year")?,
            department: selector("td.department")?,
        };

        let mut page = ParsedPage::default();
        for row in doc.select(&rows) {
            match parse_row(row, &cells, fetched_at) {
                Ok(student) => page.entities.push(Entity::Student(student)),
                Err(e) => {
                    warn!(parser = self.name(), error = %e, "skipping student row");
                    page.skipped += 1;
                }
            }
        }
        Ok(page)
    }

    fn name(&self) -> &str {
        "students"
    }
}

fn parse_row(row: ElementRef<'_>, cells: &Cells, fetched_at: DateTime<Utc>) -> Result<Student> {
    let id = required_text(row, &cells.id, "student id")?;
    let year_text = required_text(row, &cells.year, "cohort year")?;
    let year = year_text
        .parse()
        .map_err(|_| CampusBotError::parse(format!("student {id}: bad year {year_text:?}")))?;
    Ok(Student {
        name: required_text(row, &cells.name, "student name")?,
        department: required_text(row, &cells.department, "department")?,
        year,
        id,
        cached_at: fetched_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body><table class="results">
        <tr><th>學號</th><th>姓名</th></tr>
        <tr class="student"><td class="id">411234567</td><td class="name"> 王 小明 </td>
            <td class="year">111</td><td class="department">資訊工程學系</td></tr>
        <tr class="student"><td class="id">412000001</td><td class="name">陳一</td>
            <td class="year">一一二</td><td class="department">法律學系</td></tr>
        <tr class="student"><td class="id">410000002</td><td class="name">林二</td>
            <td class="year">110</td><td class="department">經濟學系</td></tr>
    </table></body></html>"#;

    #[test]
    fn parses_rows_and_skips_broken_ones() {
        let doc = Html::parse_document(PAGE);
        let url = Url::parse("https://lms.example.edu/students/search?name=x").unwrap();
        let page = StudentParser.parse(&doc, &url, Utc::now()).unwrap();

        assert_eq!(page.entities.len(), 2);
        assert_eq!(page.skipped, 1);
        let Entity::Student(first) = &page.entities[0] else {
            panic!("expected a student");
        };
        assert_eq!(first.id, "411234567");
        assert_eq!(first.name, "王 小明");
        assert_eq!(first.year, 111);
    }

    #[test]
    fn unrelated_page_yields_nothing() {
        let doc = Html::parse_document("<html><body><p>查無資料</p></body></html>");
        let url = Url::parse("https://lms.example.edu/").unwrap();
        let page = StudentParser.parse(&doc, &url, Utc::now()).unwrap();
        assert!(page.entities.is_empty());
        assert_eq!(page.skipped, 0);
    }
}
