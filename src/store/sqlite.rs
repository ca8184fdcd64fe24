use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{Item, SiteCount};

use super::schema::SCHEMA;
use super::NewsStore;

// SQLite caps bound variables at 999 in older builds; chunk IN (...) lists
// below that.
const MAX_IN_PARAMS: usize = 900;

#[derive(Clone)]
pub struct SqliteNewsStore {
    conn: Connection,
}

impl SqliteNewsStore {
    pub async fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[allow(dead_code)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl NewsStore for SqliteNewsStore {
    async fn existing_ids(&self, item_ids: &[String]) -> Result<HashSet<String>> {
        if item_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let item_ids = item_ids.to_vec();
        let found = self
            .conn
            .call(move |conn| {
                let mut found = HashSet::new();
                for chunk in item_ids.chunks(MAX_IN_PARAMS) {
                    let placeholders = vec!["?"; chunk.len()].join(",");
                    let sql = format!(
                        "SELECT item_id FROM rss_items WHERE item_id IN ({placeholders})"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let ids = stmt
                        .query_map(params_from_iter(chunk), |row| row.get::<_, String>(0))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    found.extend(ids);
                }
                Ok(found)
            })
            .await?;
        Ok(found)
    }

    async fn insert_items(&self, site_id: i64, items: &[Item]) -> Result<i64> {
        if items.is_empty() {
            return Ok(0);
        }
        let items = items.to_vec();
        let now = Utc::now();
        let count = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO rss_items (item_id, site_id, title, content, link, published, inserted_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                         ON CONFLICT(item_id) DO NOTHING",
                    )?;
                    for item in &items {
                        stmt.execute(params![
                            item.item_id,
                            item.site_id,
                            item.title,
                            item.content,
                            item.link,
                            fmt_ts(&item.published),
                            fmt_ts(&item.inserted_at),
                        ])?;
                    }
                }
                tx.execute(
                    "INSERT INTO site_count (site_id, article_count, updated_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(site_id) DO UPDATE SET
                         article_count = article_count + excluded.article_count,
                         updated_at = excluded.updated_at",
                    params![site_id, items.len() as i64, fmt_ts(&now)],
                )?;
                let count: i64 = tx.query_row(
                    "SELECT article_count FROM site_count WHERE site_id = ?1",
                    params![site_id],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    async fn recent_items(
        &self,
        site_id: i64,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Item>> {
        let items = self
            .conn
            .call(move |conn| {
                let (sql, bindings) = recent_query(
                    "item_id, site_id, title, content, link, published, inserted_at",
                    site_id,
                    limit,
                    before,
                    None,
                );
                let mut stmt = conn.prepare(&sql)?;
                let items = stmt
                    .query_map(
                        params_from_iter(bindings.iter().map(|b| b.as_ref() as &dyn ToSql)),
                        |row| item_from_row(row),
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    async fn recent_item_ids(
        &self,
        site_id: i64,
        limit: usize,
        before: Option<DateTime<Utc>>,
        max_look_back: Option<DateTime<Utc>>,
    ) -> Result<(Vec<String>, Option<DateTime<Utc>>)> {
        let page = self
            .conn
            .call(move |conn| {
                let (sql, bindings) = recent_query(
                    "item_id, inserted_at",
                    site_id,
                    limit,
                    before,
                    max_look_back,
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(
                        params_from_iter(bindings.iter().map(|b| b.as_ref() as &dyn ToSql)),
                        |row| {
                            let id: String = row.get(0)?;
                            let inserted_at: String = row.get(1)?;
                            Ok((id, inserted_at))
                        },
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let last_inserted_at = page.last().and_then(|(_, ts)| parse_ts(ts));
        let ids = page.into_iter().map(|(id, _)| id).collect();
        Ok((ids, last_inserted_at))
    }

    async fn items_by_ids(&self, item_ids: &[String]) -> Result<Vec<Item>> {
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let item_ids = item_ids.to_vec();
        let items = self
            .conn
            .call(move |conn| {
                let mut items = Vec::new();
                for chunk in item_ids.chunks(MAX_IN_PARAMS) {
                    let placeholders = vec!["?"; chunk.len()].join(",");
                    let sql = format!(
                        "SELECT item_id, site_id, title, content, link, published, inserted_at
                         FROM rss_items WHERE item_id IN ({placeholders})"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let chunk_items = stmt
                        .query_map(params_from_iter(chunk), |row| item_from_row(row))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    items.extend(chunk_items);
                }
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    async fn article_counts(&self) -> Result<Vec<SiteCount>> {
        let counts = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT site_id, article_count, updated_at FROM site_count")?;
                let counts = stmt
                    .query_map([], |row| {
                        let updated_at: String = row.get(2)?;
                        Ok(SiteCount {
                            site_id: row.get(0)?,
                            article_count: row.get(1)?,
                            updated_at: parse_ts(&updated_at).unwrap_or_else(Utc::now),
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }
}

/// Builds the shared `WHERE site_id = ? [cursor] [lookback] ORDER BY
/// inserted_at DESC LIMIT ?` query over `rss_items`.
fn recent_query(
    columns: &str,
    site_id: i64,
    limit: usize,
    before: Option<DateTime<Utc>>,
    max_look_back: Option<DateTime<Utc>>,
) -> (String, Vec<Box<dyn ToSql>>) {
    let mut sql = format!("SELECT {columns} FROM rss_items WHERE site_id = ?");
    let mut bindings: Vec<Box<dyn ToSql>> = vec![Box::new(site_id)];
    if let Some(before) = before {
        sql.push_str(" AND inserted_at < ?");
        bindings.push(Box::new(fmt_ts(&before)));
    }
    if let Some(look_back) = max_look_back {
        sql.push_str(" AND inserted_at > ?");
        bindings.push(Box::new(fmt_ts(&look_back)));
    }
    sql.push_str(" ORDER BY inserted_at DESC LIMIT ?");
    bindings.push(Box::new(limit as i64));
    (sql, bindings)
}

/// Timestamps are stored as fixed-width RFC3339 so lexicographic comparison
/// in SQL matches chronological order.
fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Tolerate SQLite's datetime('now') format.
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    let published: String = row.get(5)?;
    let inserted_at: String = row.get(6)?;
    Ok(Item {
        item_id: row.get(0)?,
        site_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        link: row.get(4)?,
        published: parse_ts(&published).unwrap_or_else(Utc::now),
        inserted_at: parse_ts(&inserted_at).unwrap_or_else(Utc::now),
    })
}
