//! Full-text index over stored items, keyed by item id, with Danish
//! analysis on title and content.
//!
//! The item store is the source of truth; this index is a write-through
//! sink that reconciliation converges toward the store. All tantivy work
//! runs on the blocking pool; a writer mutex serializes batches.

use std::collections::HashSet;
use std::ops::Bound;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tantivy::collector::{Count, DocSetCollector, TopDocs};
use tantivy::query::{BooleanQuery, Occur, Query, RangeQuery, TermQuery, TermSetQuery};
use tantivy::schema::{
    DateOptions, Field, IndexRecordOption, NumericOptions, Schema, TextFieldIndexing, TextOptions,
    Type, Value, STORED, STRING,
};
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer,
};
use tantivy::{
    doc, DocAddress, Index, IndexReader, IndexWriter, Order, ReloadPolicy, TantivyDocument, Term,
};

use crate::error::{AppError, Result};
use crate::models::Item;

const ANALYZER_NAME: &str = "da_stem";
const WRITER_HEAP_BYTES: usize = 50_000_000;
/// Documents per commit on the hot path.
const INDEX_BATCH_SIZE: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    PublishedDesc,
    PublishedAsc,
    ScoreDesc,
    ScoreAsc,
}

impl std::str::FromStr for OrderBy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "-published" => Ok(Self::PublishedDesc),
            "published" => Ok(Self::PublishedAsc),
            "-_score" => Ok(Self::ScoreDesc),
            "_score" => Ok(Self::ScoreAsc),
            other => Err(AppError::config(format!("unknown sort order {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub limit: usize,
    pub offset: usize,
    /// Inclusive lower bound on `published`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `published`.
    pub to: Option<DateTime<Utc>>,
    pub order_by: OrderBy,
    /// Match content as well as title (at least one must match).
    pub search_content: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: 10,
            offset: 0,
            from: None,
            to: None,
            order_by: OrderBy::default(),
            search_content: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub item_id: String,
    pub title: String,
    pub content: String,
    pub link: String,
    pub published: DateTime<Utc>,
    pub site_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Number of matching documents, independent of limit/offset.
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

#[derive(Clone, Copy)]
struct Fields {
    item_id: Field,
    title: Field,
    content: Field,
    link: Field,
    published: Field,
    site_id: Field,
}

#[derive(Clone)]
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<Mutex<Option<IndexWriter>>>,
    fields: Fields,
}

impl SearchIndex {
    /// Opens the index at `path`, creating it with the prescribed mapping if
    /// missing. The returned flag is true when a fresh index was created —
    /// the caller uses it to trigger a full backfill.
    pub fn open_or_create(path: &Path) -> Result<(Self, bool)> {
        let created = !path.join("meta.json").exists();
        let index = if created {
            std::fs::create_dir_all(path)?;
            Index::create_in_dir(path, build_schema())?
        } else {
            Index::open_in_dir(path)?
        };
        index.tokenizers().register(ANALYZER_NAME, danish_analyzer());

        let schema = index.schema();
        let fields = Fields {
            item_id: schema.get_field("item_id")?,
            title: schema.get_field("title")?,
            content: schema.get_field("content")?,
            link: schema.get_field("link")?,
            published: schema.get_field("published")?,
            site_id: schema.get_field("site_id")?,
        };

        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok((
            Self {
                index,
                reader,
                writer: Arc::new(Mutex::new(Some(writer))),
                fields,
            },
            created,
        ))
    }

    /// Batch write with upsert semantics per item id.
    pub async fn index(&self, items: Vec<Item>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.index_sync(&items)).await?
    }

    fn index_sync(&self, items: &[Item]) -> Result<()> {
        let mut guard = self.writer.lock().expect("index writer lock poisoned");
        let writer = guard.as_mut().ok_or(AppError::IndexClosed)?;
        for batch in items.chunks(INDEX_BATCH_SIZE) {
            for item in batch {
                writer.delete_term(Term::from_field_text(self.fields.item_id, &item.item_id));
                writer.add_document(doc!(
                    self.fields.item_id => item.item_id.as_str(),
                    self.fields.title => item.title.as_str(),
                    self.fields.content => item.content.as_str(),
                    self.fields.link => item.link.as_str(),
                    self.fields.published => to_tantivy_dt(&item.published),
                    self.fields.site_id => item.site_id,
                ))?;
            }
            writer.commit()?;
        }
        self.reader.reload()?;
        Ok(())
    }

    /// Returns the subset of `item_ids` present in the index.
    pub async fn has(&self, item_ids: &[String]) -> Result<HashSet<String>> {
        if item_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let this = self.clone();
        let item_ids = item_ids.to_vec();
        tokio::task::spawn_blocking(move || this.has_sync(&item_ids)).await?
    }

    fn has_sync(&self, item_ids: &[String]) -> Result<HashSet<String>> {
        let searcher = self.reader.searcher();
        let terms = item_ids
            .iter()
            .map(|id| Term::from_field_text(self.fields.item_id, id));
        let query = TermSetQuery::new(terms);
        let addresses = searcher.search(&query, &DocSetCollector)?;

        let mut present = HashSet::new();
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            if let Some(id) = doc.get_first(self.fields.item_id).and_then(|v| v.as_str()) {
                present.insert(id.to_string());
            }
        }
        Ok(present)
    }

    pub async fn search(&self, params: SearchParams) -> Result<SearchResults> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.search_sync(&params)).await?
    }

    fn search_sync(&self, params: &SearchParams) -> Result<SearchResults> {
        let searcher = self.reader.searcher();
        let Some(query) = self.build_query(params)? else {
            return Ok(SearchResults::default());
        };

        if params.limit == 0 {
            let total = searcher.search(&query, &Count)?;
            return Ok(SearchResults {
                total,
                hits: Vec::new(),
            });
        }

        let (total, addresses): (usize, Vec<DocAddress>) = match params.order_by {
            OrderBy::PublishedDesc | OrderBy::PublishedAsc => {
                let order = if params.order_by == OrderBy::PublishedDesc {
                    Order::Desc
                } else {
                    Order::Asc
                };
                let top = TopDocs::with_limit(params.limit)
                    .and_offset(params.offset)
                    .order_by_fast_field::<tantivy::DateTime>("published", order);
                let (hits, total) = searcher.search(&query, &(top, Count))?;
                (total, hits.into_iter().map(|(_, addr)| addr).collect())
            }
            OrderBy::ScoreDesc => {
                let top = TopDocs::with_limit(params.limit).and_offset(params.offset);
                let (hits, total) = searcher.search(&query, &(top, Count))?;
                (total, hits.into_iter().map(|(_, addr)| addr).collect())
            }
            OrderBy::ScoreAsc => {
                let top = TopDocs::with_limit(params.limit)
                    .and_offset(params.offset)
                    .tweak_score(|_segment_reader: &tantivy::SegmentReader| {
                        |_doc: tantivy::DocId, score: tantivy::Score| -score
                    });
                let (hits, total) = searcher.search(&query, &(top, Count))?;
                (total, hits.into_iter().map(|(_, addr)| addr).collect())
            }
        };

        let mut hits = Vec::with_capacity(addresses.len());
        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            hits.push(self.hit_from_doc(&doc));
        }
        Ok(SearchResults { total, hits })
    }

    /// Match query over title (and content when requested), conjoined with a
    /// date range filter when bounds are given. Returns `None` when the
    /// query holds no indexable tokens.
    fn build_query(&self, params: &SearchParams) -> Result<Option<Box<dyn Query>>> {
        let mut analyzer = self
            .index
            .tokenizers()
            .get(ANALYZER_NAME)
            .ok_or_else(|| AppError::config(format!("analyzer {ANALYZER_NAME} not registered")))?;
        let mut tokens = Vec::new();
        let mut stream = analyzer.token_stream(&params.query);
        while let Some(token) = stream.next() {
            tokens.push(token.text.clone());
        }
        if tokens.is_empty() {
            return Ok(None);
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for token in &tokens {
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.title, token),
                    IndexRecordOption::WithFreqs,
                )),
            ));
            if params.search_content {
                clauses.push((
                    Occur::Should,
                    Box::new(TermQuery::new(
                        Term::from_field_text(self.fields.content, token),
                        IndexRecordOption::WithFreqs,
                    )),
                ));
            }
        }
        let mut query: Box<dyn Query> = Box::new(BooleanQuery::new(clauses));

        if params.from.is_some() || params.to.is_some() {
            let lower = match &params.from {
                Some(dt) => {
                    Bound::Included(Term::from_field_date(self.fields.published, to_tantivy_dt(dt)))
                }
                None => Bound::Unbounded,
            };
            let upper = match &params.to {
                Some(dt) => {
                    Bound::Excluded(Term::from_field_date(self.fields.published, to_tantivy_dt(dt)))
                }
                None => Bound::Unbounded,
            };
            query = Box::new(BooleanQuery::new(vec![
                (Occur::Must, query),
                (
                    Occur::Must,
                    Box::new(RangeQuery::new_term_bounds(
                        "published".to_string(),
                        Type::Date,
                        &lower,
                        &upper,
                    )),
                ),
            ]));
        }
        Ok(Some(query))
    }

    fn hit_from_doc(&self, doc: &TantivyDocument) -> SearchHit {
        let text = |field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        SearchHit {
            item_id: text(self.fields.item_id),
            title: text(self.fields.title),
            content: text(self.fields.content),
            link: text(self.fields.link),
            published: doc
                .get_first(self.fields.published)
                .and_then(|v| v.as_datetime())
                .map(from_tantivy_dt)
                .unwrap_or_else(Utc::now),
            site_id: doc
                .get_first(self.fields.site_id)
                .and_then(|v| v.as_i64())
                .unwrap_or_default(),
        }
    }

    /// Flushes pending merges and releases the writer. Subsequent writes
    /// fail with [`AppError::IndexClosed`]; reads keep working.
    pub async fn close(&self) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let writer = this
                .writer
                .lock()
                .expect("index writer lock poisoned")
                .take();
            if let Some(writer) = writer {
                writer.wait_merging_threads()?;
            }
            Ok(())
        })
        .await?
    }
}

fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    let text_indexing = TextFieldIndexing::default()
        .set_tokenizer(ANALYZER_NAME)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let text = TextOptions::default()
        .set_indexing_options(text_indexing)
        .set_stored();

    builder.add_text_field("item_id", STRING | STORED);
    builder.add_text_field("title", text.clone());
    builder.add_text_field("content", text);
    builder.add_text_field("link", STORED);
    builder.add_date_field(
        "published",
        DateOptions::default().set_stored().set_indexed().set_fast(),
    );
    builder.add_i64_field(
        "site_id",
        NumericOptions::default().set_stored().set_indexed(),
    );
    builder.build()
}

fn danish_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::Danish))
        .build()
}

fn to_tantivy_dt(dt: &DateTime<Utc>) -> tantivy::DateTime {
    tantivy::DateTime::from_timestamp_micros(dt.timestamp_micros())
}

fn from_tantivy_dt(dt: tantivy::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(dt.into_timestamp_micros()).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::item_id;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 10, minute, 0).unwrap()
    }

    fn item(site_id: i64, title: &str, content: &str, published: DateTime<Utc>) -> Item {
        let link = format!("https://example.dk/{}", title.replace(' ', "-"));
        Item {
            item_id: item_id(title, &link),
            site_id,
            title: title.to_string(),
            content: content.to_string(),
            link,
            published,
            inserted_at: published,
        }
    }

    fn params(query: &str) -> SearchParams {
        SearchParams {
            query: query.to_string(),
            limit: 100,
            ..SearchParams::default()
        }
    }

    #[tokio::test]
    async fn open_creates_then_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let (index, created) = SearchIndex::open_or_create(dir.path()).unwrap();
            assert!(created);
            index.close().await.unwrap();
        }
        let (_index, created) = SearchIndex::open_or_create(dir.path()).unwrap();
        assert!(!created);
    }

    #[tokio::test]
    async fn index_and_has() {
        let dir = TempDir::new().unwrap();
        let (index, _) = SearchIndex::open_or_create(dir.path()).unwrap();

        let a = item(1, "Regeringen raser", "", ts(0));
        let b = item(1, "Stille dag i Folketinget", "", ts(1));
        index.index(vec![a.clone(), b.clone()]).await.unwrap();

        let present = index
            .has(&[a.item_id.clone(), b.item_id.clone(), "absent".to_string()])
            .await
            .unwrap();
        assert_eq!(present.len(), 2);
        assert!(present.contains(&a.item_id));
        assert!(present.contains(&b.item_id));

        assert!(index.has(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reindexing_same_id_is_an_upsert() {
        let dir = TempDir::new().unwrap();
        let (index, _) = SearchIndex::open_or_create(dir.path()).unwrap();

        let mut a = item(1, "Unik overskrift", "gammel", ts(0));
        index.index(vec![a.clone()]).await.unwrap();
        a.content = "opdateret".to_string();
        index.index(vec![a.clone()]).await.unwrap();

        let results = index.search(params("unik")).await.unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].content, "opdateret");
    }

    #[tokio::test]
    async fn title_match_with_danish_stemming() {
        let dir = TempDir::new().unwrap();
        let (index, _) = SearchIndex::open_or_create(dir.path()).unwrap();

        index
            .index(vec![
                item(1, "Borgmester rasende over budget", "", ts(0)),
                item(1, "Roligt byrådsmøde", "", ts(1)),
            ])
            .await
            .unwrap();

        // "raser" and "rasende" share the stem; casing is irrelevant.
        for query in ["rasende", "RASENDE", "raser"] {
            let results = index.search(params(query)).await.unwrap();
            assert_eq!(results.total, 1, "query {query:?}");
            assert_eq!(results.hits[0].title, "Borgmester rasende over budget");
        }
    }

    #[tokio::test]
    async fn content_is_searched_only_on_request() {
        let dir = TempDir::new().unwrap();
        let (index, _) = SearchIndex::open_or_create(dir.path()).unwrap();

        index
            .index(vec![item(
                2,
                "Kort overskrift",
                "ministeren afviser al kritik",
                ts(0),
            )])
            .await
            .unwrap();

        let title_only = index.search(params("ministeren")).await.unwrap();
        assert_eq!(title_only.total, 0);

        let mut with_content = params("ministeren");
        with_content.search_content = true;
        let results = index.search(with_content).await.unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].site_id, 2);
    }

    #[tokio::test]
    async fn orders_by_published_both_ways() {
        let dir = TempDir::new().unwrap();
        let (index, _) = SearchIndex::open_or_create(dir.path()).unwrap();

        index
            .index(vec![
                item(1, "storm nummer et", "", ts(0)),
                item(1, "storm nummer to", "", ts(1)),
                item(1, "storm nummer tre", "", ts(2)),
            ])
            .await
            .unwrap();

        let newest_first = index.search(params("storm")).await.unwrap();
        let titles: Vec<&str> = newest_first.hits.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["storm nummer tre", "storm nummer to", "storm nummer et"]
        );

        let mut asc = params("storm");
        asc.order_by = OrderBy::PublishedAsc;
        let oldest_first = index.search(asc).await.unwrap();
        let titles: Vec<&str> = oldest_first.hits.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["storm nummer et", "storm nummer to", "storm nummer tre"]
        );
    }

    #[tokio::test]
    async fn date_filter_is_inclusive_lower_exclusive_upper() {
        let dir = TempDir::new().unwrap();
        let (index, _) = SearchIndex::open_or_create(dir.path()).unwrap();

        index
            .index(vec![
                item(1, "regn mandag", "", ts(0)),
                item(1, "regn tirsdag", "", ts(1)),
                item(1, "regn onsdag", "", ts(2)),
            ])
            .await
            .unwrap();

        let mut from = params("regn");
        from.from = Some(ts(1));
        let results = index.search(from).await.unwrap();
        assert_eq!(results.total, 2);

        let mut to = params("regn");
        to.to = Some(ts(1));
        let results = index.search(to).await.unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].title, "regn mandag");
    }

    #[tokio::test]
    async fn paginates_with_limit_and_offset() {
        let dir = TempDir::new().unwrap();
        let (index, _) = SearchIndex::open_or_create(dir.path()).unwrap();

        index
            .index(vec![
                item(1, "valg a", "", ts(0)),
                item(1, "valg b", "", ts(1)),
                item(1, "valg c", "", ts(2)),
            ])
            .await
            .unwrap();

        let mut page = params("valg");
        page.limit = 1;
        page.offset = 1;
        let results = index.search(page).await.unwrap();
        assert_eq!(results.total, 3);
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].title, "valg b");
    }

    #[tokio::test]
    async fn blank_query_matches_nothing() {
        let dir = TempDir::new().unwrap();
        let (index, _) = SearchIndex::open_or_create(dir.path()).unwrap();
        index.index(vec![item(1, "noget", "", ts(0))]).await.unwrap();

        let results = index.search(params("   ")).await.unwrap();
        assert_eq!(results.total, 0);
        assert!(results.hits.is_empty());
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let (index, _) = SearchIndex::open_or_create(dir.path()).unwrap();
        index.close().await.unwrap();

        let result = index.index(vec![item(1, "sent", "", ts(0))]).await;
        assert!(matches!(result, Err(AppError::IndexClosed)));
    }
}
