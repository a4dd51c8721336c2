//! Campus directory pages: people and organizational units.

use chrono::{DateTime, Utc};
use campusbot_shared::{CampusBotError, Contact, ContactType, Entity, EntityKind, Result};
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use super::{PageParser, ParsedPage, child_link, child_text, required_text, selector};

/// Parses `tr.contact[data-uid][data-type]` rows.
pub struct ContactParser;

struct Cells {
    name: Selector,
    name_alt: Selector,
    title: Selector,
    organization: Selector,
    superior: Selector,
    extension: Selector,
    phone: Selector,
    email: Selector,
    email_link: Selector,
    website_link: Selector,
    location: Selector,
}

impl Cells {
    fn new() -> Result<Self> {
        Ok(Self {
            name: selector("td.name")?,
            name_alt: selector("td.name-alt")?,
            title: selector("td.title")?,
            organization: selector("td.organization")?,
            superior: selector("td.superior")?,
            extension: selector("td.extension")?,
            phone: selector("td.phone")?,
            email: selector("td.email")?,
            email_link: selector(r#"td.email a[href^="mailto:"]"#)?,
            website_link: selector("td.website a[href]")?,
            location: selector("td.location")?,
        })
    }
}

impl PageParser for ContactParser {
    fn kind(&self) -> EntityKind {
        EntityKind::Contact
    }

    fn parse(&self, doc: &Html, page_url: &Url, fetched_at: DateTime<Utc>) -> Result<ParsedPage> {
        let rows = selector("tr.contact")?;
        let cells = Cells::new()?;

        let mut page = ParsedPage::default();
        for row in doc.select(&rows) {
            match parse_row(row, &cells, page_url, fetched_at) {
                Ok(contact) => page.entities.push(Entity::Contact(contact)),
                Err(e) => {
                    warn!(parser = self.name(), error = %e, "skipping contact row");
                    page.skipped += 1;
                }
            }
        }
        Ok(page)
    }

    fn name(&self) -> &str {
        "contacts"
    }
}

fn parse_row(
    row: ElementRef<'_>,
    cells: &Cells,
    page_url: &Url,
    fetched_at: DateTime<Utc>,
) -> Result<Contact> {
    let uid = row
        .value()
        .attr("data-uid")
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| CampusBotError::parse("contact row without data-uid"))?;
    let contact_type: ContactType = row
        .value()
        .attr("data-type")
        .unwrap_or("individual")
        .parse()
        .map_err(|e: CampusBotError| CampusBotError::parse(format!("contact {uid}: {e}")))?;

    // Prefer the mailto target; some rows obfuscate the visible address.
    let email = row
        .select(&cells.email_link)
        .find_map(|a| a.value().attr("href"))
        .and_then(|href| href.strip_prefix("mailto:"))
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .or_else(|| child_text(row, &cells.email));

    Ok(Contact {
        uid: uid.to_string(),
        contact_type,
        name: required_text(row, &cells.name, "contact name")?,
        name_alt: child_text(row, &cells.name_alt),
        title: child_text(row, &cells.title),
        organization: child_text(row, &cells.organization),
        superior: child_text(row, &cells.superior),
        extension: child_text(row, &cells.extension),
        phone: child_text(row, &cells.phone),
        email,
        website: child_link(row, &cells.website_link, page_url),
        location: child_text(row, &cells.location),
        cached_at: fetched_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<table>
      <tr class="contact" data-uid="org-csie" data-type="organization">
        <td class="name">資訊工程學系</td><td class="name-alt">Dept. of CSIE</td>
        <td class="superior">電機資訊學院</td><td class="extension">66100</td>
        <td class="website"><a href="/units/csie">網站</a></td>
        <td class="location">電資大樓 5F</td>
      </tr>
      <tr class="contact" data-uid="p-001" data-type="individual">
        <td class="name">張 教授</td><td class="title">教授兼系主任</td>
        <td class="organization">資訊工程學系</td><td class="extension"></td>
        <td class="email"><a href="mailto:chang@example.edu">[email]</a></td>
      </tr>
      <tr class="contact" data-type="individual"><td class="name">無編號</td></tr>
      <tr class="contact" data-uid="x" data-type="robot"><td class="name">機器人</td></tr>
    </table>"#;

    #[test]
    fn parses_people_and_units() {
        let doc = Html::parse_document(PAGE);
        let url = Url::parse("https://directory.example.edu/contacts/search?q=資工").unwrap();
        let page = ContactParser.parse(&doc, &url, Utc::now()).unwrap();

        assert_eq!(page.entities.len(), 2);
        assert_eq!(page.skipped, 2);

        let Entity::Contact(unit) = &page.entities[0] else {
            panic!("expected a contact");
        };
        assert_eq!(unit.contact_type, ContactType::Organization);
        assert_eq!(unit.name_alt.as_deref(), Some("Dept. of CSIE"));
        assert_eq!(
            unit.website.as_deref(),
            Some("https://directory.example.edu/units/csie")
        );

        let Entity::Contact(person) = &page.entities[1] else {
            panic!("expected a contact");
        };
        assert_eq!(person.name, "張 教授");
        assert_eq!(person.email.as_deref(), Some("chang@example.edu"));
        assert_eq!(person.extension, None);
        assert_eq!(person.organization.as_deref(), Some("資訊工程學系"));
    }
}
