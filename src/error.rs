use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    /// Catalog or config file is malformed. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// A feed URL could not be fetched, or answered outside 2xx.
    #[error("fetch error for {url}: {message}")]
    Fetch {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// Feed bytes could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Database failure. The transaction in flight is rolled back.
    #[error("store error: {0}")]
    Store(#[from] tokio_rusqlite::Error),

    /// Search backend failure. Non-fatal on the ingestion hot path.
    #[error("index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Write attempted after the index writer was released.
    #[error("search index is closed")]
    IndexClosed,

    /// The cancellation token fired while a request was in flight.
    #[error("operation cancelled")]
    Cancelled,
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn parse(message: impl std::fmt::Display) -> Self {
        Self::Parse(message.to_string())
    }

    pub fn fetch(url: impl Into<String>, status: Option<u16>, message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            status,
            message: message.to_string(),
        }
    }
}
