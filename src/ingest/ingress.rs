//! Submission ingress.
//!
//! Validates an upload, settles its id and format, and hands it to the
//! dispatcher exactly once. Nothing is dispatched for a rejected upload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::dispatcher::{DispatchError, Dispatcher};
use crate::domain::{
    AudioFormat, AudioPayload, InvalidSubmissionId, Submission, SubmissionId, UnsupportedFormat,
};

/// Why an upload was refused
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("request body is empty")]
    MissingBody,

    #[error(transparent)]
    UnsupportedContentType(#[from] UnsupportedFormat),

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("invalid submission id: {0}")]
    InvalidSubmissionId(#[from] InvalidSubmissionId),

    #[error("failed to dispatch submission: {0}")]
    Dispatch(#[from] DispatchError),
}

impl IngressError {
    /// Whether the caller is at fault
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Dispatch(_))
    }
}

/// Acknowledgement returned to the uploader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub submission_id: SubmissionId,
    pub status: String,
}

impl Ack {
    fn processing(submission_id: SubmissionId) -> Self {
        Self {
            submission_id,
            status: "processing".to_string(),
        }
    }
}

/// JSON upload body: base64 audio plus an optional declared type
#[derive(Debug, Deserialize)]
struct UploadEnvelope {
    audio_file: String,
    #[serde(default)]
    content_type: Option<String>,
}

/// Accepts uploads and dispatches them
#[derive(Clone)]
pub struct SubmissionIngress {
    dispatcher: Arc<dyn Dispatcher>,
}

impl SubmissionIngress {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Accept one upload.
    ///
    /// `id` is the caller-supplied path segment, if any. A JSON body is read
    /// as an upload envelope; anything else must be raw audio in an
    /// allow-listed content type.
    #[instrument(skip(self, body), fields(body_bytes = body.len()))]
    pub async fn accept(
        &self,
        id: Option<&str>,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Result<Ack, IngressError> {
        let submission_id = match id {
            Some(raw) => SubmissionId::parse(raw)?,
            None => SubmissionId::generate(),
        };

        let declared = content_type.unwrap_or_default();
        let (format, payload) = if is_json(declared) {
            parse_envelope(&body)?
        } else {
            let format = AudioFormat::from_content_type(declared)?;
            if body.is_empty() {
                return Err(IngressError::MissingBody);
            }
            (format, AudioPayload::Raw(body))
        };

        let submission = Submission::new(submission_id.clone(), format, payload);
        let payload_bytes = submission.payload.encoded_len();

        if let Err(e) = self.dispatcher.dispatch(submission).await {
            warn!(submission_id = %submission_id, error = %e, "Dispatch failed");
            return Err(e.into());
        }

        info!(
            submission_id = %submission_id,
            format = %format,
            payload_bytes,
            dispatch = self.dispatcher.mode(),
            "Submission accepted"
        );

        Ok(Ack::processing(submission_id))
    }
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn parse_envelope(body: &[u8]) -> Result<(AudioFormat, AudioPayload), IngressError> {
    if body.is_empty() {
        return Err(IngressError::MissingBody);
    }

    let envelope: UploadEnvelope =
        serde_json::from_slice(body).map_err(|e| IngressError::MalformedBody(e.to_string()))?;

    if envelope.audio_file.trim().is_empty() {
        return Err(IngressError::MalformedBody("audio_file is empty".to_string()));
    }

    let format = match envelope.content_type.as_deref() {
        Some(declared) => AudioFormat::from_content_type(declared)?,
        None => AudioFormat::Wav,
    };

    Ok((format, AudioPayload::Base64(envelope.audio_file)))
}
