//! Domain types for the submission pipeline.
//!
//! This module contains the core data structures:
//! - Submission: an accepted recording and its declared format
//! - Artifact: keys and payloads of stage outputs
//! - Job: explicit job state persisted next to the artifacts
//! - Prompt: the two generation templates

pub mod artifact;
pub mod job;
pub mod prompt;
pub mod submission;

// Re-export commonly used types
pub use artifact::{ArtifactKey, ArtifactKind, SubmissionResult};
pub use job::{JobRecord, JobState, Stage, Transition};
pub use prompt::{PromptTemplate, Prompts, TemplateKind, TRANSCRIPT_PLACEHOLDER};
pub use submission::{
    AudioFormat, AudioPayload, InvalidSubmissionId, PayloadError, Submission, SubmissionId,
    UnsupportedFormat,
};
