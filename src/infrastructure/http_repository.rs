// HTTP dataset repository implementation
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::application::dataset_repository::{DatasetRepository, FetchError};
use crate::domain::dataset::Record;
use crate::domain::geometry::{Feature, FeatureCollection};

/// Loads datasets over HTTP. Sources without an `http(s)://` scheme are
/// read from the local filesystem, which is how the bundled vector layers
/// are served.
#[derive(Debug, Clone)]
pub struct HttpDatasetRepository {
    client: reqwest::Client,
}

impl HttpDatasetRepository {
    pub fn new(timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }

    async fn get_body(&self, source: &str) -> Result<Vec<u8>, FetchError> {
        if !is_remote(source) {
            return tokio::fs::read(source)
                .await
                .map_err(|e| FetchError::Transport(format!("{}: {}", source, e)));
        }

        let response = self
            .client
            .get(source)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("GET {} failed with status {}", source, status);
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        Ok(body.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(&self, source: &str) -> Result<T, FetchError> {
        let body = self.get_body(source).await?;
        let parsed = serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
        tracing::debug!("Loaded {} ({} bytes)", source, body.len());
        Ok(parsed)
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn transport_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(error.to_string())
    }
}

#[async_trait]
impl DatasetRepository for HttpDatasetRepository {
    async fn fetch_records(&self, url: &str) -> Result<Vec<Record>, FetchError> {
        self.get_json(url).await
    }

    async fn fetch_features(&self, url: &str) -> Result<Vec<Feature>, FetchError> {
        let collection: FeatureCollection = self.get_json(url).await?;
        Ok(collection.features)
    }
}
