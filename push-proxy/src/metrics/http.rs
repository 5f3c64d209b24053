use reqwest::{StatusCode, Url};

use crate::error::RelayError;

use super::MetricsScraper;

/// [`MetricsScraper`] that fetches a metrics endpoint over HTTP
#[derive(Debug, Clone)]
pub struct HttpScraper {
    client: reqwest::Client,
    /// URL of the metrics endpoint
    url: Url,
}

impl HttpScraper {
    /// Create a new [`HttpScraper`]
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait::async_trait]
impl MetricsScraper for HttpScraper {
    async fn scrape(&self) -> Result<reqwest::Body, RelayError> {
        log::debug!("Scrap metrics: {}", self.url);

        let resp = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|err| RelayError::transport(&self.url, err))?;

        let status = resp.status();
        if status != StatusCode::OK {
            // The body is only read for diagnostics
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Scrape {
                url: self.url.clone(),
                status,
                body,
            });
        }

        log::trace!(
            "Metrics endpoint answered with content length {:?}",
            resp.content_length()
        );

        // Stream the snapshot instead of buffering it
        Ok(reqwest::Body::wrap_stream(resp.bytes_stream()))
    }
}
