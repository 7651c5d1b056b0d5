// Repository trait for remote dataset access
use async_trait::async_trait;

use crate::domain::dataset::Record;
use crate::domain::geometry::Feature;

/// Why a remote dataset could not be loaded. Cloneable so the last failure
/// can sit in a widget's visible state.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("request was cancelled")]
    Cancelled,
}

#[async_trait]
pub trait DatasetRepository: Send + Sync {
    /// Fetch a JSON array of flat records
    async fn fetch_records(&self, url: &str) -> Result<Vec<Record>, FetchError>;

    /// Fetch a GeoJSON feature collection
    async fn fetch_features(&self, url: &str) -> Result<Vec<Feature>, FetchError>;
}
