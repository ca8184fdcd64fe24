//! Observability seam for the ingestion pipeline.
//!
//! The pipeline emits a counter per fetched URL and a gauge per site; what
//! happens to those signals is the sink's business. The default sink writes
//! them to the log.

#[cfg(test)]
use std::sync::Mutex;

pub trait MetricSink: Send + Sync {
    /// One increment per feed HTTP response, tagged with its status code.
    fn fetch_status(&self, status_code: u16, site: &str, url: &str);

    /// Current article count for a site.
    fn article_count(&self, site: &str, count: i64);
}

/// Sink that forwards every signal to `tracing`.
pub struct LogMetrics;

impl MetricSink for LogMetrics {
    fn fetch_status(&self, status_code: u16, site: &str, url: &str) {
        tracing::debug!(status_code, site, url, "rss fetch status");
    }

    fn article_count(&self, site: &str, count: i64) {
        tracing::debug!(site, count, "rss article count");
    }
}

/// Sink that records every emission, for assertions in tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingMetrics {
    pub fetch_statuses: Mutex<Vec<(u16, String, String)>>,
    pub article_counts: Mutex<Vec<(String, i64)>>,
}

#[cfg(test)]
impl MetricSink for RecordingMetrics {
    fn fetch_status(&self, status_code: u16, site: &str, url: &str) {
        self.fetch_statuses
            .lock()
            .expect("metrics lock poisoned")
            .push((status_code, site.to_string(), url.to_string()));
    }

    fn article_count(&self, site: &str, count: i64) {
        self.article_counts
            .lock()
            .expect("metrics lock poisoned")
            .push((site.to_string(), count));
    }
}
