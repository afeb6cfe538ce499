//! Job state for one submission.
//!
//! The worker keeps a `JobRecord` in memory and rewrites `state/{id}.json`
//! after every transition. The record is advisory: completion is defined by
//! the final result artifact alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::submission::SubmissionId;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Materialize,
    Transcribe,
    Generate,
    Persist,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Materialize => "materialize",
            Self::Transcribe => "transcribe",
            Self::Generate => "generate",
            Self::Persist => "persist",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Picked up by a worker, audio not yet transcribed
    Pending,

    /// Waiting on the transcription client
    Transcribing,

    /// Waiting on both generation calls
    Generating,

    /// Final result written
    Completed,

    /// A stage failed; no final result will be written by this run
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stage a job in this state is working on
    pub fn stage(self) -> Option<Stage> {
        match self {
            Self::Pending => Some(Stage::Materialize),
            Self::Transcribing => Some(Stage::Transcribe),
            Self::Generating => Some(Stage::Generate),
            Self::Completed | Self::Failed => None,
        }
    }
}

/// One recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub state: JobState,
    pub at: DateTime<Utc>,

    /// Time spent in the previous state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Persisted job state (`state/{id}.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub submission_id: SubmissionId,
    pub state: JobState,

    /// Stage that failed (only for `Failed`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    /// Internal error message (only for `Failed`). Never shown to pollers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Content hash of the upload this run processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_hash: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transitions: Vec<Transition>,
}

impl JobRecord {
    /// Start a record in the `Pending` state
    pub fn new(submission_id: SubmissionId) -> Self {
        let now = Utc::now();
        Self {
            submission_id,
            state: JobState::Pending,
            failed_stage: None,
            error: None,
            payload_hash: None,
            created_at: now,
            updated_at: now,
            transitions: vec![Transition {
                state: JobState::Pending,
                at: now,
                duration_ms: None,
            }],
        }
    }

    pub fn with_payload_hash(mut self, hash: impl Into<String>) -> Self {
        self.payload_hash = Some(hash.into());
        self
    }

    /// Whether this record is a completed run over the upload with `hash`
    pub fn completed_for(&self, hash: &str) -> bool {
        self.state == JobState::Completed && self.payload_hash.as_deref() == Some(hash)
    }

    /// Move to a new state. Transitions out of a terminal state are ignored.
    pub fn advance(&mut self, state: JobState) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        let now = Utc::now();
        let duration_ms = (now - self.updated_at).num_milliseconds().max(0) as u64;

        self.state = state;
        self.updated_at = now;
        self.transitions.push(Transition {
            state,
            at: now,
            duration_ms: Some(duration_ms),
        });
        true
    }

    /// Record a failure in `stage`
    pub fn fail(&mut self, stage: Stage, error: impl Into<String>) -> bool {
        if !self.advance(JobState::Failed) {
            return false;
        }
        self.failed_stage = Some(stage);
        self.error = Some(error.into());
        true
    }

    /// Total wall time from creation to the last transition
    pub fn elapsed_ms(&self) -> u64 {
        (self.updated_at - self.created_at).num_milliseconds().max(0) as u64
    }
}
