//! pathways - asynchronous voice submission pipeline
//!
//! Turns a recorded voice note into two emails: a response to a government
//! consultation (green paper) and a letter to the sender's MP.
//!
//! # Architecture
//!
//! ```text
//! upload → Ingress → Dispatcher → Worker → Artifact Store ← Status
//! ```
//!
//! - Ingress validates uploads and acknowledges immediately
//! - The dispatcher spawns a task or hands off to an on-disk queue
//! - The worker transcribes, generates both emails concurrently and
//!   writes `results/{id}.json`, which is what "completed" means
//! - Status reads only persisted artifacts
//!
//! # Modules
//!
//! - `adapters`: transcription and generation clients
//! - `core`: worker, dispatcher, status, retry, backups
//! - `domain`: submissions, artifacts, job state, prompts
//! - `ingest`: ingress, submission queue, queue consumer
//! - `store`: artifact stores (local disk, S3-compatible, memory)
//! - `server`: HTTP routes
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Serve the API
//! pathways serve
//!
//! # Run a queue worker (DISPATCH_MODE=queue)
//! pathways worker
//!
//! # Process one recording locally
//! pathways process memo.m4a --dry-run
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod server;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{JobStatus, StatusReader, Worker};
pub use domain::{AudioFormat, Submission, SubmissionId, SubmissionResult};
pub use ingest::{SubmissionIngress, SubmissionQueue};
pub use store::{ArtifactStore, LocalDiskStore, MemoryStore};
