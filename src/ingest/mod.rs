//! The ingestion coordinator: one tick fans out fetch → parse → store →
//! index across all sites, and a reconciliation pass converges the search
//! index toward the item store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use crate::catalog::{NewsSite, SiteCatalog};
use crate::error::{AppError, Result};
use crate::feed::parser::parse_feed;
use crate::feed::FetchFeeds;
use crate::metrics::MetricSink;
use crate::models::{Item, SearchResultItem, SiteCount};
use crate::search::{SearchIndex, SearchParams};
use crate::store::NewsStore;

/// Ids per store round-trip while reconciling.
const RECONCILE_PAGE_SIZE: usize = 10_000;
/// Rows fetched and indexed per reconcile sub-chunk.
const REINDEX_CHUNK: usize = 3_000;
/// Smaller sub-chunk for sites whose feed carries full article bodies.
const REINDEX_CHUNK_CONTENT: usize = 100;
/// Lookback horizon of the reconciliation pass kicked after each tick.
const RECONCILE_LOOK_BACK_DAYS: i64 = 31;

/// Queries outside these bounds return empty results without touching the
/// index.
const MIN_QUERY_LEN: usize = 3;
const MAX_QUERY_LEN: usize = 50;

#[derive(Clone)]
pub struct Coordinator {
    catalog: Arc<SiteCatalog>,
    store: Arc<dyn NewsStore>,
    fetcher: Arc<dyn FetchFeeds>,
    search: SearchIndex,
    metrics: Arc<dyn MetricSink>,
}

impl Coordinator {
    pub fn new(
        catalog: Arc<SiteCatalog>,
        store: Arc<dyn NewsStore>,
        fetcher: Arc<dyn FetchFeeds>,
        search: SearchIndex,
        metrics: Arc<dyn MetricSink>,
    ) -> Self {
        Self {
            catalog,
            store,
            fetcher,
            search,
            metrics,
        }
    }

    /// Startup hook. When the search index was just created, runs a full
    /// backfill from the store, then publishes the current article counts.
    pub async fn initialise(&self, index_created: bool) -> Result<()> {
        if index_created {
            tracing::info!("search index created, running full backfill");
            self.reconcile(None).await?;
        }
        self.refresh_metrics().await
    }

    pub async fn refresh_metrics(&self) -> Result<()> {
        for count in self.store.article_counts().await? {
            let name = self.catalog.site_name(count.site_id);
            if !name.is_empty() {
                self.metrics.article_count(&name, count.article_count);
            }
        }
        Ok(())
    }

    /// One ingestion tick: a concurrent task per site, then a background
    /// reconciliation pass bounded to the lookback horizon. Per-site
    /// failures are logged and never cancel siblings. The returned handle
    /// tracks the background pass.
    pub async fn ingest_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let mut tasks = Vec::new();
        for site in self.catalog.sites() {
            if site.disabled || site.urls.is_empty() {
                tracing::debug!(site = %site.name, "skipping site without feed urls");
                continue;
            }
            let this = self.clone();
            let site = site.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                match this.ingest_site(&site, &cancel).await {
                    Ok(inserted) => {
                        tracing::info!(site = %site.name, inserted, "site ingested");
                    }
                    Err(e) => {
                        tracing::warn!(site = %site.name, error = %e, "site ingestion failed");
                    }
                }
            }));
        }
        for task in join_all(tasks).await {
            if let Err(e) = task {
                tracing::error!(error = %e, "ingestion task panicked");
            }
        }

        let this = self.clone();
        let max_look_back = Utc::now() - Duration::days(RECONCILE_LOOK_BACK_DAYS);
        Ok(tokio::spawn(async move {
            if let Err(e) = this.reconcile(Some(max_look_back)).await {
                tracing::warn!(error = %e, "post-ingestion reconciliation failed");
            }
        }))
    }

    async fn ingest_site(&self, site: &NewsSite, cancel: &CancellationToken) -> Result<usize> {
        // Every item of this parse pass shares one insertion timestamp.
        let now = Utc::now();

        let payloads = self.fetcher.fetch(site, cancel).await;
        let mut parsed = Vec::new();
        let mut seen = HashSet::new();
        let mut succeeded = 0usize;
        let mut first_error = None;
        for (url, payload) in payloads {
            let bytes = match payload {
                Ok(bytes) => bytes,
                Err(e) => {
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            match parse_feed(&bytes, now) {
                Ok(items) => {
                    succeeded += 1;
                    for item in items {
                        if seen.insert(item.item_id.clone()) {
                            parsed.push(item);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(site = %site.name, url = %url, error = %e, "feed parse failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        // The site is skipped this tick only when every URL failed.
        if succeeded == 0 {
            return Err(first_error
                .unwrap_or_else(|| AppError::fetch(site.urls.join(","), None, "no feed payloads")));
        }

        let ids: Vec<String> = parsed.iter().map(|i| i.item_id.clone()).collect();
        let existing = self.store.existing_ids(&ids).await?;
        let new_items: Vec<Item> = parsed
            .into_iter()
            .filter(|i| !existing.contains(&i.item_id) && !site.is_blocked_title(&i.title))
            .map(|i| i.into_item(site.id, now))
            .collect();
        let inserted = new_items.len();

        let article_count = self.store.insert_items(site.id, &new_items).await?;
        // Index failures are recovered by reconciliation, not by this tick.
        if let Err(e) = self.search.index(new_items).await {
            tracing::warn!(site = %site.name, error = %e, "failed to index new items");
        }
        if article_count > 0 {
            self.metrics.article_count(&site.name, article_count);
        }
        Ok(inserted)
    }

    /// Walks recent items per site and indexes the ones missing from the
    /// search index. Idempotent; never mutates the store. `max_look_back`
    /// bounds how old an item may be and still be considered.
    pub async fn reconcile(&self, max_look_back: Option<DateTime<Utc>>) -> Result<()> {
        for site in self.catalog.sites() {
            if let Err(e) = self.reconcile_site(site, max_look_back).await {
                tracing::warn!(site = %site.name, error = %e, "reconciliation failed for site");
            }
        }
        Ok(())
    }

    async fn reconcile_site(
        &self,
        site: &NewsSite,
        max_look_back: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut before = None;
        loop {
            let (ids, last_inserted_at) = self
                .store
                .recent_item_ids(site.id, RECONCILE_PAGE_SIZE, before, max_look_back)
                .await?;
            let last_page = ids.len() < RECONCILE_PAGE_SIZE;

            let in_index = self.search.has(&ids).await?;
            let missing: Vec<String> = ids
                .into_iter()
                .filter(|id| !in_index.contains(id))
                .collect();
            if !missing.is_empty() {
                tracing::info!(site = %site.name, missing = missing.len(), "indexing items missing from search");
                self.index_item_ids(site, &missing).await?;
            }

            match (last_page, last_inserted_at) {
                (true, _) | (false, None) => break,
                (false, Some(ts)) => before = Some(ts),
            }
        }
        Ok(())
    }

    async fn index_item_ids(&self, site: &NewsSite, item_ids: &[String]) -> Result<()> {
        let chunk_size = if site.article_has_content {
            REINDEX_CHUNK_CONTENT
        } else {
            REINDEX_CHUNK
        };
        for chunk in item_ids.chunks(chunk_size) {
            let items = self.store.items_by_ids(chunk).await?;
            self.search.index(items).await?;
        }
        Ok(())
    }

    // Read paths, consumed by the external HTTP layer.

    pub async fn recent_items(
        &self,
        site_id: i64,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Item>> {
        self.store.recent_items(site_id, limit, before).await
    }

    pub async fn recent_titles(
        &self,
        site_id: i64,
        limit: usize,
        shuffle: bool,
    ) -> Result<Vec<String>> {
        let items = self.store.recent_items(site_id, limit, None).await?;
        let mut titles: Vec<String> = items.into_iter().map(|i| i.title).collect();
        if shuffle {
            titles.shuffle(&mut rand::rng());
        }
        Ok(titles)
    }

    pub async fn search_items(&self, params: SearchParams) -> Result<Vec<SearchResultItem>> {
        let query_len = params.query.chars().count();
        if query_len < MIN_QUERY_LEN || query_len > MAX_QUERY_LEN {
            return Ok(Vec::new());
        }
        let results = self.search.search(params).await?;
        Ok(results
            .hits
            .into_iter()
            .map(|hit| SearchResultItem {
                site_name: self.catalog.site_name(hit.site_id),
                item_id: hit.item_id,
                title: hit.title,
                content: hit.content,
                link: hit.link,
                published: hit.published,
                site_id: hit.site_id,
            })
            .collect())
    }

    /// Matching document count per site for a query, sorted by site name.
    pub async fn site_count_for_query(
        &self,
        query: &str,
        search_content: bool,
    ) -> Result<Vec<(String, usize)>> {
        let query_len = query.chars().count();
        if query_len < MIN_QUERY_LEN || query_len > MAX_QUERY_LEN {
            return Ok(Vec::new());
        }

        let probe = self
            .search
            .search(SearchParams {
                query: query.to_string(),
                limit: 0,
                search_content,
                ..SearchParams::default()
            })
            .await?;
        if probe.total == 0 {
            return Ok(Vec::new());
        }
        let all = self
            .search
            .search(SearchParams {
                query: query.to_string(),
                limit: probe.total,
                search_content,
                ..SearchParams::default()
            })
            .await?;

        let mut by_site: HashMap<i64, usize> = HashMap::new();
        for hit in &all.hits {
            *by_site.entry(hit.site_id).or_default() += 1;
        }
        let mut counts: Vec<(String, usize)> = by_site
            .into_iter()
            .map(|(site_id, count)| (self.catalog.site_name(site_id), count))
            .collect();
        counts.sort();
        Ok(counts)
    }

    pub async fn article_counts(&self) -> Result<Vec<SiteCount>> {
        self.store.article_counts().await
    }

    pub fn site_infos(&self) -> &[NewsSite] {
        self.catalog.sites()
    }

    pub fn site_by_id(&self, id: i64) -> Option<&NewsSite> {
        self.catalog.find_by_id(id)
    }

    pub fn site_by_name(&self, name: &str) -> Option<&NewsSite> {
        self.catalog.find_by_name(name)
    }
}
