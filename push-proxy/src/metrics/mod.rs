use crate::error::RelayError;

pub mod http;

/// Trait to scrap the metrics snapshot of the relayed target
#[async_trait::async_trait]
pub trait MetricsScraper {
    /// Scrap the target once
    ///
    /// The snapshot is returned as an opaque body, ready to be forwarded as is.
    /// Dropping the body releases the underlying connection.
    async fn scrape(&self) -> Result<reqwest::Body, RelayError>;
}
