use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::catalog::NewsSite;
use crate::error::{AppError, Result};
use crate::metrics::MetricSink;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One fetched payload per site URL, in input order.
pub type UrlPayload = (String, Result<Vec<u8>>);

/// Retrieval of raw feed bytes for a site. Behind a trait so the ingestion
/// pipeline can run against canned payloads in tests.
#[async_trait]
pub trait FetchFeeds: Send + Sync {
    async fn fetch(&self, site: &NewsSite, cancel: &CancellationToken) -> Vec<UrlPayload>;
}

pub struct HttpFeedFetcher {
    client: Client,
    user_agents: HashMap<String, String>,
    metrics: Arc<dyn MetricSink>,
}

impl HttpFeedFetcher {
    pub fn new(user_agents: HashMap<String, String>, metrics: Arc<dyn MetricSink>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent("nyhedsstrom/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            user_agents,
            metrics,
        }
    }

    async fn fetch_url(
        &self,
        site: &NewsSite,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some(key) = &site.user_agent_key {
            if let Some(agent) = self.user_agents.get(key) {
                request = request.header(reqwest::header::USER_AGENT, agent);
            }
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            res = request.send() => res?,
        };

        let status = response.status();
        self.metrics.fetch_status(status.as_u16(), &site.name, url);

        if !status.is_success() {
            return Err(AppError::fetch(
                url,
                Some(status.as_u16()),
                format!("unexpected status {status}"),
            ));
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            res = response.bytes() => res?,
        };
        Ok(body.to_vec())
    }
}

#[async_trait]
impl FetchFeeds for HttpFeedFetcher {
    async fn fetch(&self, site: &NewsSite, cancel: &CancellationToken) -> Vec<UrlPayload> {
        let mut payloads = Vec::with_capacity(site.urls.len());
        for url in &site.urls {
            let body = self.fetch_url(site, url, cancel).await;
            if let Err(e) = &body {
                tracing::warn!(site = %site.name, url = %url, error = %e, "feed fetch failed");
            }
            payloads.push((url.clone(), body));
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SiteCatalog;
    use crate::metrics::RecordingMetrics;

    fn test_site(url: &str) -> NewsSite {
        let json = format!(r#"[{{"id": 1, "name": "Test", "urls": ["{url}"]}}]"#);
        SiteCatalog::from_json(&json).unwrap().sites()[0].clone()
    }

    #[tokio::test]
    async fn cancellation_aborts_before_the_request_is_sent() {
        let metrics = Arc::new(RecordingMetrics::default());
        let fetcher = HttpFeedFetcher::new(HashMap::new(), metrics.clone());
        let site = test_site("http://127.0.0.1:9/rss");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let payloads = fetcher.fetch(&site, &cancel).await;

        assert_eq!(payloads.len(), 1);
        assert!(matches!(payloads[0].1, Err(AppError::Cancelled)));
        // No response, so no status counter was emitted.
        assert!(metrics.fetch_statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn connection_failure_surfaces_per_url() {
        let metrics = Arc::new(RecordingMetrics::default());
        let fetcher = HttpFeedFetcher::new(HashMap::new(), metrics);
        // Port 9 is the discard service; nothing listens there in CI.
        let site = test_site("http://127.0.0.1:9/rss");

        let payloads = fetcher.fetch(&site, &CancellationToken::new()).await;
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].0, "http://127.0.0.1:9/rss");
        assert!(payloads[0].1.is_err());
    }
}
