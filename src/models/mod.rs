use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Content-addressed identifier of a feed entry: `hex(md5(title + ":" + link))`.
pub fn item_id(title: &str, link: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(title.as_bytes());
    hasher.update(b":");
    hasher.update(link.as_bytes());
    hex::encode(hasher.finalize())
}

/// A feed entry as produced by the parser, before it is attributed to a site
/// and stamped with an insertion time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub item_id: String,
    pub title: String,
    pub content: String,
    pub link: String,
    pub published: DateTime<Utc>,
}

impl NewItem {
    pub fn into_item(self, site_id: i64, inserted_at: DateTime<Utc>) -> Item {
        Item {
            item_id: self.item_id,
            site_id,
            title: self.title,
            content: self.content,
            link: self.link,
            published: self.published,
            inserted_at,
        }
    }
}

/// A stored article. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub item_id: String,
    pub site_id: i64,
    pub title: String,
    pub content: String,
    pub link: String,
    pub published: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
}

/// Per-site article counter, maintained in the same transaction as inserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteCount {
    pub site_id: i64,
    pub article_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// A search hit enriched with the site's display name from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub item_id: String,
    pub site_name: String,
    pub title: String,
    pub content: String,
    pub link: String,
    pub published: DateTime<Utc>,
    pub site_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_is_md5_of_title_colon_link() {
        let mut hasher = Md5::new();
        hasher.update("Stormvejr på vej:https://example.dk/a/1".as_bytes());
        let expected = hex::encode(hasher.finalize());

        assert_eq!(item_id("Stormvejr på vej", "https://example.dk/a/1"), expected);
    }

    #[test]
    fn item_id_is_32_hex_chars() {
        let id = item_id("title", "link");
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn item_id_distinguishes_title_link_split() {
        // "a:b" + ":" + "c" differs from "a" + ":" + "b:c"
        assert_ne!(item_id("a:b", "c"), item_id("a", "b:c"));
    }
}
