//! Queue consumer run by `pathways worker`.
//!
//! Claims submissions from the queue and runs them through the worker. A
//! redelivered submission is acknowledged without running the pipeline again
//! only when the job record shows a completed run over the same audio.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::queue::{Delivery, QueueError, Settlement, SubmissionQueue};
use crate::core::Worker;
use crate::domain::{ArtifactKey, JobRecord, SubmissionId};

/// What one poll of the queue did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing to claim
    Idle,

    /// Pipeline ran and wrote a result
    Completed,

    /// Redelivery of a submission that already has a result
    Skipped,

    /// Pipeline failed
    Failed,
}

/// Totals from a drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct QueueConsumer {
    queue: Arc<SubmissionQueue>,
    worker: Worker,
    worker_id: String,
    poll_interval: Duration,
}

impl QueueConsumer {
    pub fn new(queue: Arc<SubmissionQueue>, worker: Worker) -> Self {
        Self {
            queue,
            worker,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim and process at most one submission
    pub async fn poll_once(&self) -> Result<PollOutcome, QueueError> {
        let Some(delivery) = self.queue.claim(&self.worker_id).await? else {
            return Ok(PollOutcome::Idle);
        };

        self.handle(delivery).await
    }

    async fn handle(&self, delivery: Delivery) -> Result<PollOutcome, QueueError> {
        let id = delivery.submission.id.clone();
        let hash = delivery.payload_hash.clone();

        if delivery.is_redelivery() && self.already_processed(&id, &hash).await {
            info!(submission_id = %id, attempt = delivery.attempt, "Result already written for this audio, acknowledging redelivery");
            self.queue.complete(&id, &hash).await?;
            return Ok(PollOutcome::Skipped);
        }

        let (outcome, settlement) = match self.worker.process(delivery.submission).await {
            Ok(_) => (PollOutcome::Completed, self.queue.complete(&id, &hash).await?),
            Err(e) => (PollOutcome::Failed, self.queue.fail(&id, &hash, &e.to_string()).await?),
        };

        if settlement == Settlement::Superseded {
            debug!(submission_id = %id, "Newer audio is queued for this submission");
        }
        Ok(outcome)
    }

    /// Whether a completed run over exactly this upload left its result behind
    async fn already_processed(&self, id: &SubmissionId, payload_hash: &str) -> bool {
        let store = self.worker.store();

        let state_key = ArtifactKey::state(id);
        let record = match store.get(state_key.as_str()).await {
            Ok(bytes) => serde_json::from_slice::<JobRecord>(&bytes).ok(),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(submission_id = %id, error = %e, "Could not read job state; processing again");
                }
                None
            }
        };
        if !record.is_some_and(|r| r.completed_for(payload_hash)) {
            return false;
        }

        let result_key = ArtifactKey::result(id);
        match store.exists(result_key.as_str()).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(submission_id = %id, error = %e, "Could not check for an existing result; processing again");
                false
            }
        }
    }

    /// Process until the queue has nothing deliverable
    pub async fn drain(&self) -> Result<DrainSummary, QueueError> {
        let mut summary = DrainSummary::default();

        loop {
            match self.poll_once().await? {
                PollOutcome::Idle => return Ok(summary),
                PollOutcome::Completed => summary.completed += 1,
                PollOutcome::Skipped => summary.skipped += 1,
                PollOutcome::Failed => summary.failed += 1,
            }
        }
    }

    /// Poll forever, sleeping when idle
    pub async fn run(&self) -> Result<(), QueueError> {
        info!(
            worker_id = %self.worker_id,
            queue = %self.queue.dir().display(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Queue consumer started"
        );

        loop {
            match self.poll_once().await {
                Ok(PollOutcome::Idle) => {
                    debug!("Queue idle");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Queue poll failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}
