//! Job status as seen by a poller.
//!
//! Derived from persisted artifacts only. Resolution order:
//! 1. `results/{id}.json` present → completed (unparseable → error)
//! 2. `state/{id}.json` says failed → failed, with a generic message
//! 3. anything else → processing

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::{ArtifactKey, JobRecord, JobState, Stage, SubmissionId, SubmissionResult};
use crate::store::{ArtifactStore, StoreError};

/// Response body of the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Processing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<Stage>,
    },
    Completed {
        greenpaper_output: String,
        mp_output: String,
    },
    Failed {
        stage: Stage,
        error: String,
    },
}

impl JobStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl From<SubmissionResult> for JobStatus {
    fn from(result: SubmissionResult) -> Self {
        Self::Completed {
            greenpaper_output: result.greenpaper_output,
            mp_output: result.mp_output,
        }
    }
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("failed to read {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("result {key} is corrupt: {source}")]
    CorruptResult {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Message shown to pollers for a failed stage. Internal errors stay in logs.
pub fn public_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Materialize => "The uploaded audio could not be read.",
        Stage::Transcribe => "The recording could not be transcribed.",
        Stage::Generate => "The emails could not be generated.",
        Stage::Persist => "The result could not be saved.",
    }
}

/// Read-only view over the artifact store
#[derive(Clone)]
pub struct StatusReader {
    store: Arc<dyn ArtifactStore>,
}

impl StatusReader {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub async fn status(&self, id: &SubmissionId) -> Result<JobStatus, StatusError> {
        let key = ArtifactKey::result(id);
        match self.store.get(key.as_str()).await {
            Ok(bytes) => {
                let result: SubmissionResult =
                    serde_json::from_slice(&bytes).map_err(|source| StatusError::CorruptResult {
                        key: key.to_string(),
                        source,
                    })?;
                return Ok(result.into());
            }
            Err(e) if e.is_not_found() => {}
            Err(source) => {
                return Err(StatusError::Store {
                    key: key.to_string(),
                    source,
                })
            }
        }

        Ok(self.from_state_record(id).await)
    }

    /// The state record is advisory. Read problems degrade to plain processing.
    async fn from_state_record(&self, id: &SubmissionId) -> JobStatus {
        let key = ArtifactKey::state(id);
        let bytes = match self.store.get(key.as_str()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if !e.is_not_found() {
                    warn!(submission_id = %id, key = %key, error = %e, "Failed to read job state");
                }
                return JobStatus::Processing { stage: None };
            }
        };

        match serde_json::from_slice::<JobRecord>(&bytes) {
            Ok(record) if record.state == JobState::Failed => {
                let stage = record.failed_stage.unwrap_or(Stage::Materialize);
                JobStatus::Failed {
                    stage,
                    error: public_message(stage).to_string(),
                }
            }
            Ok(record) => JobStatus::Processing {
                stage: record.state.stage(),
            },
            Err(e) => {
                warn!(submission_id = %id, key = %key, error = %e, "Job state record is unreadable");
                JobStatus::Processing { stage: None }
            }
        }
    }
}
