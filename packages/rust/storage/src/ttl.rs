//! TTL maintenance: expiry sweeps, freshness counts, and the queries the
//! warmup scheduler uses to find rows nearing expiry.

use std::time::Duration;

use campusbot_shared::{CampusBotError, EntityKind, RequestContext, Result};
use libsql::Value;
use libsql::params::Params;
use serde::Serialize;

use crate::{Store, cutoff, text};

/// Every cached table, with its expiry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTable {
    Students,
    Contacts,
    Courses,
    HistoricalCourses,
    ProgramCourses,
    Syllabi,
    Stickers,
}

impl CacheTable {
    pub const ALL: [CacheTable; 7] = [
        Self::Students,
        Self::Contacts,
        Self::Courses,
        Self::HistoricalCourses,
        Self::ProgramCourses,
        Self::Syllabi,
        Self::Stickers,
    ];

    /// Tables swept by the periodic cleanup.
    pub const TTL_GOVERNED: [CacheTable; 5] = [
        Self::Contacts,
        Self::Courses,
        Self::HistoricalCourses,
        Self::ProgramCourses,
        Self::Syllabi,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::Contacts => "contacts",
            Self::Courses => "courses",
            Self::HistoricalCourses => "historical_courses",
            Self::ProgramCourses => "program_courses",
            Self::Syllabi => "syllabi",
            Self::Stickers => "stickers",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            Self::Students => "id",
            Self::ProgramCourses => "course_uid",
            Self::Stickers => "url",
            _ => "uid",
        }
    }

    /// Students and stickers never expire.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Students | Self::Stickers)
    }

    /// The table backing lookups of `kind`.
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Student => Self::Students,
            EntityKind::Contact => Self::Contacts,
            EntityKind::Course => Self::Courses,
            EntityKind::Syllabus => Self::Syllabi,
        }
    }
}

impl std::fmt::Display for CacheTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Row counts for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub table: CacheTable,
    pub total: u64,
    /// Rows still inside the hard TTL (equals `total` for permanent tables).
    pub fresh: u64,
}

/// Snapshot of the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub path: String,
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    pub tables: Vec<TableStats>,
}

impl Store {
    /// Delete rows with `cached_at < now - ttl`. Returns the number removed.
    pub async fn delete_expired(
        &self,
        ctx: &RequestContext,
        table: CacheTable,
        ttl: Duration,
    ) -> Result<u64> {
        if table.is_permanent() {
            return Err(CampusBotError::invalid(format!(
                "{table} rows never expire"
            )));
        }
        let sql = format!("DELETE FROM {} WHERE cached_at < ?1", table.name());
        let deleted = self
            .write_one(ctx, &sql, vec![Value::Integer(cutoff(ttl))])
            .await?;
        if deleted > 0 {
            tracing::debug!(table = %table, deleted, "expired rows removed");
        }
        Ok(deleted)
    }

    /// Rows inside the store's hard TTL.
    pub async fn count_fresh(&self, ctx: &RequestContext, table: CacheTable) -> Result<u64> {
        if table.is_permanent() {
            return self.count_total(ctx, table).await;
        }
        let sql = format!("SELECT COUNT(*) FROM {} WHERE cached_at > ?1", table.name());
        self.query_count(
            ctx,
            &sql,
            Params::Positional(vec![Value::Integer(self.fresh_cutoff())]),
        )
        .await
    }

    /// Rows with `now - hard < cached_at <= now - soft`: still served, due
    /// for a refresh.
    pub async fn count_expiring(
        &self,
        ctx: &RequestContext,
        table: CacheTable,
        soft_ttl: Duration,
    ) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE cached_at > ?1 AND cached_at <= ?2",
            table.name()
        );
        self.query_count(ctx, &sql, self.expiring_window(soft_ttl))
            .await
    }

    /// Keys of expiring rows, oldest first.
    pub async fn list_expiring_keys(
        &self,
        ctx: &RequestContext,
        table: CacheTable,
        soft_ttl: Duration,
        limit: usize,
    ) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT {key} FROM {table}
             WHERE cached_at > ?1 AND cached_at <= ?2
             GROUP BY {key}
             ORDER BY MIN(cached_at)
             LIMIT {limit}",
            key = table.key_column(),
            table = table.name(),
        );
        self.query_all(ctx, &sql, self.expiring_window(soft_ttl), |row| text(row, 0))
            .await
    }

    /// Per-table totals and fresh counts.
    pub async fn stats(&self, ctx: &RequestContext) -> Result<StoreStats> {
        let mut tables = Vec::with_capacity(CacheTable::ALL.len());
        for table in CacheTable::ALL {
            let total = self.count_total(ctx, table).await?;
            let fresh = self.count_fresh(ctx, table).await?;
            tables.push(TableStats {
                table,
                total,
                fresh,
            });
        }
        Ok(StoreStats {
            path: self.options().path.clone(),
            cache_ttl: self.cache_ttl(),
            tables,
        })
    }

    async fn count_total(&self, ctx: &RequestContext, table: CacheTable) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        self.query_count(ctx, &sql, Params::None).await
    }

    fn expiring_window(&self, soft_ttl: Duration) -> Params {
        Params::Positional(vec![
            Value::Integer(self.fresh_cutoff()),
            Value::Integer(cutoff(soft_ttl)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use campusbot_shared::{Contact, ContactType, ErrorKind, Student};

    const SOFT: Duration = Duration::from_secs(5 * 24 * 3600);
    const HARD: Duration = Duration::from_secs(7 * 24 * 3600);

    fn contact(uid: &str, age_days: i64) -> Contact {
        Contact {
            cached_at: days_ago(age_days),
            ..Contact::new(uid, ContactType::Organization, format!("單位{uid}"))
        }
    }

    #[tokio::test]
    async fn ttl_windows_partition_rows() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        store
            .save_contacts(&ctx, &[contact("fresh", 1), contact("soon", 6), contact("dead", 8)])
            .await
            .unwrap();

        assert_eq!(store.count_fresh(&ctx, CacheTable::Contacts).await.unwrap(), 2);
        assert_eq!(
            store
                .count_expiring(&ctx, CacheTable::Contacts, SOFT)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .list_expiring_keys(&ctx, CacheTable::Contacts, SOFT, 10)
                .await
                .unwrap(),
            vec!["soon".to_string()]
        );

        let deleted = store
            .delete_expired(&ctx, CacheTable::Contacts, HARD)
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let stats = store.stats(&ctx).await.unwrap();
        let contacts = stats
            .tables
            .iter()
            .find(|t| t.table == CacheTable::Contacts)
            .unwrap();
        assert_eq!(contacts.total, 2);
        assert_eq!(contacts.fresh, 2);
    }

    #[tokio::test]
    async fn permanent_tables_refuse_expiry_sweeps() {
        let store = test_store().await;
        let ctx = RequestContext::background();
        store
            .save_student(
                &ctx,
                &Student {
                    id: "400000001".into(),
                    name: "老學長".into(),
                    year: 90,
                    department: "數學系".into(),
                    cached_at: days_ago(3000),
                },
            )
            .await
            .unwrap();

        let err = store
            .delete_expired(&ctx, CacheTable::Students, HARD)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(store.count_fresh(&ctx, CacheTable::Students).await.unwrap(), 1);
    }

    #[test]
    fn kinds_map_to_tables() {
        assert_eq!(CacheTable::for_kind(EntityKind::Syllabus), CacheTable::Syllabi);
        assert!(CacheTable::TTL_GOVERNED.iter().all(|t| !t.is_permanent()));
    }
}
