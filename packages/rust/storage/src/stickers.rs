//! Sticker image URLs. Permanent: reads ignore `cached_at`.

use campusbot_shared::{RequestContext, Result, Sticker, StickerSource};
use libsql::params::Params;
use libsql::{Row, Value};

use crate::writeset::WriteSet;
use crate::{Store, text, text_value, timestamp, ts_value};

pub(crate) const UPSERT_STICKER: &str = "INSERT INTO stickers (url, source, cached_at)
     VALUES (?1, ?2, ?3)
     ON CONFLICT(url) DO UPDATE SET
       source = excluded.source,
       cached_at = excluded.cached_at";

impl Store {
    /// Upsert stickers in one transaction.
    pub async fn save_stickers(&self, ctx: &RequestContext, stickers: &[Sticker]) -> Result<()> {
        let mut set = WriteSet::new();
        set.stickers(stickers);
        self.commit(ctx, set).await
    }

    /// All stickers, optionally from one source, oldest first.
    pub async fn list_stickers(
        &self,
        ctx: &RequestContext,
        source: Option<StickerSource>,
    ) -> Result<Vec<Sticker>> {
        match source {
            Some(source) => {
                self.query_all(
                    ctx,
                    "SELECT url, source, cached_at FROM stickers
                     WHERE source = ?1 ORDER BY cached_at, url",
                    Params::Positional(vec![text_value(source.as_str())]),
                    row_to_sticker,
                )
                .await
            }
            None => {
                self.query_all(
                    ctx,
                    "SELECT url, source, cached_at FROM stickers ORDER BY cached_at, url",
                    Params::None,
                    row_to_sticker,
                )
                .await
            }
        }
    }

    pub async fn count_stickers(&self, ctx: &RequestContext) -> Result<u64> {
        self.query_count(ctx, "SELECT COUNT(*) FROM stickers", Params::None)
            .await
    }
}

pub(crate) fn sticker_values(s: &Sticker) -> Vec<Value> {
    vec![
        text_value(&s.url),
        text_value(s.source.as_str()),
        ts_value(&s.cached_at),
    ]
}

fn row_to_sticker(row: &Row) -> Result<Sticker> {
    Ok(Sticker {
        url: text(row, 0)?,
        source: text(row, 1)?.parse()?,
        cached_at: timestamp(row, 2)?,
    })
}
