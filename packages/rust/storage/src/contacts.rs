//! Contact rows (individuals and organizational units). TTL-governed.

use campusbot_shared::{CampusBotError, Contact, ContactType, RequestContext, Result};
use libsql::params::Params;
use libsql::{Row, Value};

use crate::search::{CharSet, contains_pattern, validate_term};
use crate::writeset::WriteSet;
use crate::{
    SEARCH_LIMIT, Store, opt_text, opt_value, text, text_value, timestamp, ts_value,
};

/// Row cap for the fuzzy name scan.
pub const CONTACT_FUZZY_LIMIT: usize = 2000;

const CONTACT_COLUMNS: &str = "uid, type, name, name_alt, title, organization, superior, \
     extension, phone, email, website, location, cached_at";

pub(crate) const UPSERT_CONTACT: &str = "INSERT INTO contacts (uid, type, name, name_alt, title, organization,
       superior, extension, phone, email, website, location, cached_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
     ON CONFLICT(uid) DO UPDATE SET
       type = excluded.type,
       name = excluded.name,
       name_alt = excluded.name_alt,
       title = excluded.title,
       organization = excluded.organization,
       superior = excluded.superior,
       extension = excluded.extension,
       phone = excluded.phone,
       email = excluded.email,
       website = excluded.website,
       location = excluded.location,
       cached_at = excluded.cached_at";

impl Store {
    /// Get a live contact by UID.
    pub async fn get_contact(&self, ctx: &RequestContext, uid: &str) -> Result<Contact> {
        let sql =
            format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE uid = ?1 AND cached_at > ?2");
        self.query_one(
            ctx,
            &sql,
            Params::Positional(vec![text_value(uid), Value::Integer(self.fresh_cutoff())]),
            row_to_contact,
        )
        .await?
        .ok_or_else(|| CampusBotError::not_found("contact", uid))
    }

    /// Live contacts whose name, alternate name, or organization contains
    /// `term`, ordered by (type, name).
    pub async fn search_contacts(&self, ctx: &RequestContext, term: &str) -> Result<Vec<Contact>> {
        let term = validate_term(term)?;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE (name LIKE ?1 ESCAPE '\\'
                    OR name_alt LIKE ?1 ESCAPE '\\'
                    OR organization LIKE ?1 ESCAPE '\\')
               AND cached_at > ?2
             ORDER BY type, name
             LIMIT {SEARCH_LIMIT}"
        );
        self.query_all(
            ctx,
            &sql,
            Params::Positional(vec![
                Value::Text(contains_pattern(term)),
                Value::Integer(self.fresh_cutoff()),
            ]),
            row_to_contact,
        )
        .await
    }

    /// Live contacts whose name (or alternate name) contains every code
    /// point of `term`.
    pub async fn fuzzy_search_contacts(
        &self,
        ctx: &RequestContext,
        term: &str,
    ) -> Result<Vec<Contact>> {
        let chars = CharSet::new(validate_term(term)?);
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE cached_at > ?1
             ORDER BY type, name
             LIMIT {CONTACT_FUZZY_LIMIT}"
        );
        let candidates = self
            .query_all(
                ctx,
                &sql,
                Params::Positional(vec![Value::Integer(self.fresh_cutoff())]),
                row_to_contact,
            )
            .await?;
        Ok(candidates
            .into_iter()
            .filter(|c| {
                chars.is_subset_of(&c.name)
                    || c.name_alt.as_deref().is_some_and(|alt| chars.is_subset_of(alt))
            })
            .collect())
    }

    /// Members of an organization: the unit itself, its sub-units, and the
    /// people listed under it. Organizations sort first.
    pub async fn contacts_by_organization(
        &self,
        ctx: &RequestContext,
        organization: &str,
    ) -> Result<Vec<Contact>> {
        let organization = validate_term(organization)?;
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts
             WHERE (organization = ?1 OR superior = ?1 OR name = ?1)
               AND cached_at > ?2
             ORDER BY CASE type WHEN 'organization' THEN 0 ELSE 1 END, name
             LIMIT {SEARCH_LIMIT}"
        );
        self.query_all(
            ctx,
            &sql,
            Params::Positional(vec![
                text_value(organization),
                Value::Integer(self.fresh_cutoff()),
            ]),
            row_to_contact,
        )
        .await
    }

    /// Upsert a single contact.
    pub async fn save_contact(&self, ctx: &RequestContext, contact: &Contact) -> Result<()> {
        self.save_contacts(ctx, std::slice::from_ref(contact)).await
    }

    /// Upsert contacts in one transaction.
    pub async fn save_contacts(&self, ctx: &RequestContext, contacts: &[Contact]) -> Result<()> {
        let mut set = WriteSet::new();
        set.contacts(contacts);
        self.commit(ctx, set).await
    }
}

pub(crate) fn contact_values(c: &Contact) -> Vec<Value> {
    vec![
        text_value(&c.uid),
        text_value(c.contact_type.as_str()),
        text_value(&c.name),
        opt_value(&c.name_alt),
        opt_value(&c.title),
        opt_value(&c.organization),
        opt_value(&c.superior),
        opt_value(&c.extension),
        opt_value(&c.phone),
        opt_value(&c.email),
        opt_value(&c.website),
        opt_value(&c.location),
        ts_value(&c.cached_at),
    ]
}

fn row_to_contact(row: &Row) -> Result<Contact> {
    let contact_type: ContactType = text(row, 1)?.parse()?;
    Ok(Contact {
        uid: text(row, 0)?,
        contact_type,
        name: text(row, 2)?,
        name_alt: opt_text(row, 3),
        title: opt_text(row, 4),
        organization: opt_text(row, 5),
        superior: opt_text(row, 6),
        extension: opt_text(row, 7),
        phone: opt_text(row, 8),
        email: opt_text(row, 9),
        website: opt_text(row, 10),
        location: opt_text(row, 11),
        cached_at: timestamp(row, 12)?,
    })
}
