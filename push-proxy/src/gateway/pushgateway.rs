use std::time::SystemTime;

use reqwest::{header::CONTENT_TYPE, Method, RequestBuilder, Url};

use crate::{config::Credentials, error::RelayError};

use super::MetricsPusher;

/// [`MetricsPusher`] for a Prometheus Pushgateway
#[derive(Debug, Clone)]
pub struct Pushgateway {
    client: reqwest::Client,
    /// Grouping key URL, shared by pushes and cleanup
    url: Url,
    /// Basic auth credentials, if any
    credentials: Option<Credentials>,
    /// `job/instance` label values, for logging
    group: String,
}

impl Pushgateway {
    /// Create a new [`Pushgateway`] targeting an already built grouping key URL
    pub fn new(
        client: reqwest::Client,
        url: Url,
        credentials: Option<Credentials>,
        job: &str,
        instance: &str,
    ) -> Self {
        Self {
            client,
            url,
            credentials,
            group: format!("job={job}, instance={instance}"),
        }
    }

    fn request(&self, method: Method) -> RequestBuilder {
        let request = self.client.request(method, self.url.clone());
        match &self.credentials {
            Some(Credentials { username, password }) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, RelayError> {
        request
            .send()
            .await
            .map_err(|err| RelayError::transport(&self.url, err))
    }
}

#[async_trait::async_trait]
impl MetricsPusher for Pushgateway {
    async fn push(&self, payload: reqwest::Body) -> Result<(), RelayError> {
        log::debug!("Push metrics to {}", self.url);

        let resp = self
            .send(
                self.request(Method::POST)
                    .header(CONTENT_TYPE, "text/plain")
                    .body(payload),
            )
            .await?;

        let status = resp.status();
        if status.is_success() {
            log::info!(
                "[{}] Metrics pushed successfully",
                humantime::format_rfc3339_seconds(SystemTime::now())
            );
            Ok(())
        } else {
            Err(RelayError::Push {
                url: self.url.clone(),
                status,
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }

    async fn delete(&self) -> Result<(), RelayError> {
        log::debug!("Delete metrics group {}", self.url);

        let resp = self.send(self.request(Method::DELETE)).await?;

        let status = resp.status();
        if status.is_success() {
            log::info!("Cleanup successful for {}", self.group);
            Ok(())
        } else {
            Err(RelayError::Cleanup {
                url: self.url.clone(),
                status,
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }
}
