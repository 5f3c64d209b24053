use std::time::Duration;

use reqwest::{StatusCode, Url};

/// Errors detected while resolving the configuration, before the relay starts
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("push job name is empty, set a job name using --label-job")]
    MissingJob,
    #[error("instance label is empty, set an instance label using --label-instance")]
    MissingInstance,
    #[error("invalid {field} address {value:?}: {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid label {0:?}, expected key=value")]
    InvalidLabel(String),
    #[error("invalid label name {0:?}")]
    InvalidLabelName(String),
    #[error("label {0:?} is reserved for the grouping key")]
    ReservedLabel(String),
    #[error("push interval must be greater than zero")]
    ZeroInterval,
}

/// Errors that abandon a single relay cycle or the cleanup step
///
/// None of them is fatal: the relay logs them and carries on.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("metrics endpoint {url} returned {status}: {body}")]
    Scrape {
        url: Url,
        status: StatusCode,
        body: String,
    },
    #[error("Pushgateway error: {status}, {url} body: {body}")]
    Push {
        url: Url,
        status: StatusCode,
        body: String,
    },
    #[error("Pushgateway cleanup error: {status}, {url} body: {body}")]
    Cleanup {
        url: Url,
        status: StatusCode,
        body: String,
    },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl RelayError {
    pub(crate) fn transport(url: &Url, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.clone(),
            source,
        }
    }
}
