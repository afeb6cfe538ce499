//! Hand-off from ingress to a worker.
//!
//! Two modes:
//! - `InProcessDispatcher`: spawns a task on the current runtime
//! - `QueueDispatcher`: appends to the on-disk submission queue for a
//!   separate `pathways worker` process
//!
//! Dispatchers never retry. A dispatch error is returned to ingress so the
//! caller gets a server error instead of an acknowledgement.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use super::worker::Worker;
use crate::domain::Submission;
use crate::ingest::queue::{EnqueueResult, QueueError, SubmissionQueue};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to enqueue submission: {0}")]
    Queue(#[from] QueueError),

    #[error("no async runtime available to run the worker")]
    NoRuntime,

    #[error("dispatcher unavailable: {0}")]
    Unavailable(String),
}

/// Starts processing of an accepted submission without waiting for it
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Mode name for logs and `pathways config`
    fn mode(&self) -> &'static str;

    async fn dispatch(&self, submission: Submission) -> Result<(), DispatchError>;
}

/// Runs the worker as a detached task in this process
pub struct InProcessDispatcher {
    worker: Worker,
}

impl InProcessDispatcher {
    pub fn new(worker: Worker) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl Dispatcher for InProcessDispatcher {
    fn mode(&self) -> &'static str {
        "in-process"
    }

    async fn dispatch(&self, submission: Submission) -> Result<(), DispatchError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        let worker = self.worker.clone();
        let id = submission.id.clone();

        handle.spawn(async move {
            // The worker logs and journals its own outcome
            let _ = worker.process(submission).await;
        });

        debug!(submission_id = %id, "Spawned worker task");
        Ok(())
    }
}

/// Hands submissions to the out-of-process queue
pub struct QueueDispatcher {
    queue: Arc<SubmissionQueue>,
}

impl QueueDispatcher {
    pub fn new(queue: Arc<SubmissionQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Dispatcher for QueueDispatcher {
    fn mode(&self) -> &'static str {
        "queue"
    }

    async fn dispatch(&self, submission: Submission) -> Result<(), DispatchError> {
        let result = self.queue.enqueue(submission).await?;

        match &result {
            EnqueueResult::Queued(id) => info!(submission_id = %id, "Submission queued"),
            EnqueueResult::Replaced(id) => {
                info!(submission_id = %id, "Queued submission replaced with new audio")
            }
            EnqueueResult::ResetForRetry(id) => {
                info!(submission_id = %id, "Failed submission re-queued")
            }
            EnqueueResult::AlreadyQueued(id) | EnqueueResult::AlreadyProcessed(id) => {
                debug!(submission_id = %id, outcome = ?result, "Duplicate submission ignored")
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AudioFormat, AudioPayload, SubmissionId};
    use crate::ingest::queue::{ItemStatus, QueueOptions};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_queue_dispatch_enqueues() {
        let temp = TempDir::new().unwrap();
        let queue = Arc::new(
            SubmissionQueue::open(temp.path(), QueueOptions::default())
                .await
                .unwrap(),
        );
        let dispatcher = QueueDispatcher::new(queue.clone());

        let submission = Submission::new(
            SubmissionId::parse("abc123").unwrap(),
            AudioFormat::Ogg,
            AudioPayload::Raw(b"OggS".to_vec()),
        );
        dispatcher.dispatch(submission.clone()).await.unwrap();
        dispatcher.dispatch(submission).await.unwrap();

        let item = queue.get("abc123").await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(queue.status().await.unwrap().total(), 1);
        assert_eq!(dispatcher.mode(), "queue");
    }
}
