//! Artifact storage.
//!
//! Keys are slash-delimited logical paths (`results/abc123.json`). Backends:
//! - `LocalDiskStore`: files under a root directory
//! - `RemoteObjectStore`: S3-compatible HTTP object API
//! - `MemoryStore`: in-process map, for tests and dry runs

pub mod local;
pub mod memory;
pub mod remote;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalDiskStore;
pub use memory::MemoryStore;
pub use remote::{RemoteObjectStore, RemoteStoreConfig};

/// Errors returned by artifact stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key does not exist. Callers branch on this; it is not a failure.
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact key: {0:?}")]
    InvalidKey(String),

    #[error("IO error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object store returned {status} for {key}")]
    Http { key: String, status: u16 },

    #[error("object store request failed for {key}: {source}")]
    Transport {
        key: String,
        #[source]
        source: reqwest::Error,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Key/value blob storage for stage artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Write an object, replacing any previous value
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    /// Read an object. Missing keys return `StoreError::NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Check whether an object exists
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Reject keys that could escape a root directory or produce odd object names
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}
