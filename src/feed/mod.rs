pub mod fetcher;
pub mod parser;

pub use fetcher::{FetchFeeds, HttpFeedFetcher};
