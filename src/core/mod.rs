//! Core pipeline logic.
//!
//! This module contains:
//! - Worker: runs the stage sequence for one submission
//! - Dispatcher: in-process or queued hand-off from ingress
//! - StatusReader: derives job status from persisted artifacts
//! - BackupSink, ScratchFile, RetryPolicy: supporting pieces

pub mod backup;
pub mod dispatcher;
pub mod retry;
pub mod scratch;
pub mod status;
pub mod worker;

// Re-export commonly used types
pub use backup::BackupSink;
pub use dispatcher::{DispatchError, Dispatcher, InProcessDispatcher, QueueDispatcher};
pub use retry::RetryPolicy;
pub use scratch::{ScratchFile, ScratchSpace, TempScratch};
pub use status::{public_message, JobStatus, StatusError, StatusReader};
pub use worker::{StageError, Worker};
