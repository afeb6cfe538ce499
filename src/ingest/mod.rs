//! Submission intake.
//!
//! The path from an upload to a running worker:
//!
//! 1. **Ingress**: validates the upload and assigns a submission id
//! 2. **Dispatcher** (`core::dispatcher`): spawns a task or enqueues
//! 3. **Queue**: JSONL log plus payload spool for out-of-process workers
//! 4. **Consumer**: claims queued submissions and runs the worker
//!
//! ```text
//! HTTP → Ingress → Dispatcher ─┬→ tokio task → Worker
//!                              └→ Queue → Consumer → Worker
//! ```

pub mod consumer;
pub mod ingress;
pub mod queue;

// Re-export key types
pub use consumer::{DrainSummary, PollOutcome, QueueConsumer};
pub use ingress::{Ack, IngressError, SubmissionIngress};
pub use queue::{
    Compaction, Delivery, EnqueueResult, ItemStatus, QueueError, QueueItem, QueueOptions,
    QueueStatus, Settlement, SubmissionQueue,
};
