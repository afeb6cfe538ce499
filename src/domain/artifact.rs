//! Artifacts produced by pipeline stages.
//!
//! Every artifact key is derived from the submission id and the stage that
//! produced it, so two submissions never share a key.

use serde::{Deserialize, Serialize};

use super::submission::{AudioFormat, SubmissionId};

/// Kinds of artifact the worker writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Backup of the materialized audio
    Audio,

    /// Trimmed transcription text
    Transcript,

    /// Both generated emails, concatenated
    Email,

    /// Machine-readable final result (defines completion)
    Result,

    /// Job state record
    State,
}

impl ArtifactKind {
    /// Top-level key prefix
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Transcript => "transcript",
            Self::Email => "email",
            Self::Result => "results",
            Self::State => "state",
        }
    }

    /// Content type recorded with the stored object
    pub fn content_type(self, format: Option<AudioFormat>) -> &'static str {
        match self {
            Self::Audio => format.map(AudioFormat::mime).unwrap_or("application/octet-stream"),
            Self::Transcript | Self::Email => "text/plain; charset=utf-8",
            Self::Result | Self::State => "application/json",
        }
    }
}

/// Key of a stage artifact, e.g. `transcript/abc123.txt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey {
    pub kind: ArtifactKind,
    key: String,
    content_type: &'static str,
}

impl ArtifactKey {
    pub fn audio(id: &SubmissionId, format: AudioFormat) -> Self {
        Self::build(ArtifactKind::Audio, id, format.extension(), Some(format))
    }

    pub fn transcript(id: &SubmissionId) -> Self {
        Self::build(ArtifactKind::Transcript, id, "txt", None)
    }

    pub fn email(id: &SubmissionId) -> Self {
        Self::build(ArtifactKind::Email, id, "txt", None)
    }

    pub fn result(id: &SubmissionId) -> Self {
        Self::build(ArtifactKind::Result, id, "json", None)
    }

    pub fn state(id: &SubmissionId) -> Self {
        Self::build(ArtifactKind::State, id, "json", None)
    }

    fn build(
        kind: ArtifactKind,
        id: &SubmissionId,
        extension: &str,
        format: Option<AudioFormat>,
    ) -> Self {
        Self {
            kind,
            key: format!("{}/{}.{}", kind.prefix(), id, extension),
            content_type: kind.content_type(format),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

/// Final result of a completed submission (`results/{id}.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// Formal response to the consultation
    pub greenpaper_output: String,

    /// Letter from the constituent to their MP
    pub mp_output: String,
}

impl SubmissionResult {
    /// Backup text for `email/{id}.txt`
    pub fn combined(&self) -> String {
        format!("{}\n\n{}", self.greenpaper_output, self.mp_output)
    }
}
