mod schema;
mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Item, SiteCount};

pub use sqlite::SqliteNewsStore;

/// Relational persistence of items and per-site article counts.
///
/// The store owns exclusive write authority: callers never touch rows
/// directly. Behind a trait so the backend is swappable and the pipeline is
/// testable against a scratch database.
#[async_trait]
pub trait NewsStore: Send + Sync {
    /// Returns the subset of `item_ids` already present.
    async fn existing_ids(&self, item_ids: &[String]) -> Result<HashSet<String>>;

    /// Inserts items (idempotent by item id), bumps the site counter by
    /// `items.len()` in the same transaction, and returns the site's current
    /// article count.
    async fn insert_items(&self, site_id: i64, items: &[Item]) -> Result<i64>;

    /// Most recent items for a site by `inserted_at`, optionally strictly
    /// before a cursor.
    async fn recent_items(
        &self,
        site_id: i64,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Item>>;

    /// Same as [`recent_items`](Self::recent_items), projected to item ids.
    /// Also returns the smallest `inserted_at` produced, for cursor paging.
    /// `max_look_back` bounds the walk to items strictly newer than it.
    async fn recent_item_ids(
        &self,
        site_id: i64,
        limit: usize,
        before: Option<DateTime<Utc>>,
        max_look_back: Option<DateTime<Utc>>,
    ) -> Result<(Vec<String>, Option<DateTime<Utc>>)>;

    /// Full rows for the given ids. Duplicate input ids are tolerated.
    async fn items_by_ids(&self, item_ids: &[String]) -> Result<Vec<Item>>;

    /// Bulk read of all site counters.
    async fn article_counts(&self) -> Result<Vec<SiteCount>>;
}
