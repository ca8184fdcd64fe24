pub const SCHEMA: &str = r#"
-- ingested articles, immutable once written
CREATE TABLE IF NOT EXISTS rss_items (
    item_id TEXT PRIMARY KEY,
    site_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    link TEXT NOT NULL,
    published TEXT NOT NULL,
    inserted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rss_items_site_inserted ON rss_items(site_id, inserted_at DESC);

-- per-site article counter, updated in the same transaction as inserts
CREATE TABLE IF NOT EXISTS site_count (
    site_id INTEGER PRIMARY KEY,
    article_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
"#;
