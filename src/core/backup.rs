//! Best-effort writes.
//!
//! Stage backups and job state records go through a `BackupSink`. A failed
//! write is logged and dropped; it never changes the outcome of a run. The
//! final result is written directly to the store by the worker.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{ArtifactKey, SubmissionId};
use crate::store::ArtifactStore;

/// Optional store that swallows write failures
#[derive(Clone, Default)]
pub struct BackupSink {
    store: Option<Arc<dyn ArtifactStore>>,
}

impl BackupSink {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A sink that writes nothing
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Write `bytes` under `key`, logging any failure
    pub async fn record(&self, id: &SubmissionId, key: &ArtifactKey, bytes: &[u8]) {
        let Some(store) = &self.store else {
            return;
        };

        match store.put(key.as_str(), bytes.to_vec(), key.content_type()).await {
            Ok(()) => debug!(
                submission_id = %id,
                key = %key,
                bytes = bytes.len(),
                store = store.name(),
                "Backup written"
            ),
            Err(e) => warn!(
                submission_id = %id,
                key = %key,
                store = store.name(),
                error = %e,
                "Backup write failed"
            ),
        }
    }
}

impl std::fmt::Debug for BackupSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupSink")
            .field("store", &self.store.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl ArtifactStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }

        async fn put(&self, key: &str, _: Vec<u8>, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Http {
                key: key.to_string(),
                status: 503,
            })
        }

        async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::NotFound(key.to_string()))
        }
    }

    fn id() -> SubmissionId {
        SubmissionId::parse("abc123").unwrap()
    }

    #[tokio::test]
    async fn test_record_writes_to_store() {
        let store = MemoryStore::new();
        let sink = BackupSink::new(Arc::new(store.clone()));

        sink.record(&id(), &ArtifactKey::transcript(&id()), b"hello").await;

        assert_eq!(store.text("transcript/abc123.txt").as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let sink = BackupSink::new(Arc::new(BrokenStore));
        sink.record(&id(), &ArtifactKey::email(&id()), b"text").await;
        assert!(sink.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_sink_writes_nothing() {
        let sink = BackupSink::disabled();
        sink.record(&id(), &ArtifactKey::email(&id()), b"text").await;
        assert!(!sink.is_enabled());
    }
}
