//! Blob store contract for failure-report artifacts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Destination and retry parameters for one push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOptions {
    pub region: String,
    pub bucket: String,
    pub key: String,
    pub concurrency: u32,
    pub max_retries: u32,
    pub presign_ttl_minutes: u32,
}

/// Errors pushing to the blob store.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("upload failed: {0}")]
    Upload(String),

    #[error("presign failed: {0}")]
    Presign(String),
}

/// Append-only artifact store. Returns a presigned URL for the pushed
/// object.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn push(
        &self,
        content_type: &str,
        body: Vec<u8>,
        opts: PushOptions,
    ) -> Result<String, BlobError>;
}

/// Process configuration for failure-report uploads. Reports are skipped
/// entirely when region or bucket is unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobConfig {
    pub region: String,
    pub bucket: String,
    pub key_prefix: String,
}

impl BlobConfig {
    /// Uploads happen only when both region and bucket are configured.
    pub fn is_configured(&self) -> bool {
        !self.region.is_empty() && !self.bucket.is_empty()
    }
}
