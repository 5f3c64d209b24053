use base64::Engine;
use indexmap::IndexMap;
use reqwest::Url;

use crate::error::{ConfigError, RelayError};

pub mod pushgateway;

/// Where the namespace segment goes in the grouping key
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum NamespacePlacement {
    /// Right after the instance, before the extra labels
    Leading,
    /// After the extra labels
    #[default]
    Trailing,
}

/// Identity under which the metrics are grouped on the gateway
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeriesIdentity {
    /// Value of the `job` label
    pub job: String,
    /// Value of the `instance` label
    pub instance: String,
    /// Value of the optional `namespace` label
    pub namespace: Option<String>,
    /// Extra labels, in the order they were given
    pub labels: IndexMap<String, String>,
    /// Position of the `namespace` label in the grouping key
    pub namespace_placement: NamespacePlacement,
}

impl SeriesIdentity {
    /// Labels of the grouping key, in URL order
    pub fn grouping_labels(&self) -> Vec<(&str, &str)> {
        let namespace = self
            .namespace
            .as_deref()
            .map(|namespace| ("namespace", namespace));
        let mut labels = Vec::with_capacity(self.labels.len() + 3);

        labels.push(("job", self.job.as_str()));
        labels.push(("instance", self.instance.as_str()));
        if self.namespace_placement == NamespacePlacement::Leading {
            labels.extend(namespace);
        }
        labels.extend(
            self.labels
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );
        if self.namespace_placement == NamespacePlacement::Trailing {
            labels.extend(namespace);
        }

        labels
    }

    /// Build the gateway URL of this grouping key
    ///
    /// `{gateway}/metrics/job/{job}/instance/{instance}[/{name}/{value}]*`
    ///
    /// The result only depends on the identity and the gateway address, so the
    /// URL used for cleanup is exactly the one used for pushes.
    pub fn grouping_url(&self, gateway: &Url) -> Result<Url, ConfigError> {
        let mut url = gateway.clone();
        url.set_query(None);
        url.set_fragment(None);

        let mut path = vec!["metrics".to_owned()];
        for (name, value) in self.grouping_labels() {
            path.extend(encode_label(name, value));
        }

        url.path_segments_mut()
            .map_err(|()| ConfigError::InvalidUrl {
                field: "pushgateway",
                value: gateway.to_string(),
                reason: "cannot be used as a base URL".to_owned(),
            })?
            .pop_if_empty()
            .extend(&path);

        Ok(url)
    }
}

/// Encode a label as two path segments
///
/// Values that cannot be carried by a plain path segment use the base64 form
/// understood by the Pushgateway: `{name}@base64/{value}`. This includes `.`
/// and `..`, which URL path normalization would otherwise drop.
fn encode_label(name: &str, value: &str) -> [String; 2] {
    if value.is_empty() {
        [format!("{name}@base64"), "=".to_owned()]
    } else if value.contains('/') || value == "." || value == ".." {
        [
            format!("{name}@base64"),
            base64::engine::general_purpose::URL_SAFE.encode(value),
        ]
    } else {
        [name.to_owned(), value.to_owned()]
    }
}

/// Trait to forward metrics to a gateway
#[async_trait::async_trait]
pub trait MetricsPusher {
    /// Push a metrics snapshot under the grouping key
    async fn push(&self, payload: reqwest::Body) -> Result<(), RelayError>;

    /// Delete every metric stored under the grouping key
    async fn delete(&self) -> Result<(), RelayError>;
}
