//! Submissions accepted at ingress.
//!
//! A submission is never persisted as its own entity. It lives from the moment
//! ingress accepts it until the worker has materialized its audio.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Longest submission id we accept (it becomes a storage key component)
pub const MAX_SUBMISSION_ID_LEN: usize = 128;

/// Path-safe submission identifier.
///
/// Only ASCII letters, digits, `-` and `_` are allowed, so the id can be
/// embedded in artifact keys and spool file names without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubmissionId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSubmissionId {
    #[error("submission id is empty")]
    Empty,

    #[error("submission id exceeds {MAX_SUBMISSION_ID_LEN} characters")]
    TooLong,

    #[error("submission id contains an invalid character: {0:?}")]
    InvalidChar(char),
}

impl SubmissionId {
    /// Validate a caller-supplied id
    pub fn parse(raw: &str) -> Result<Self, InvalidSubmissionId> {
        if raw.is_empty() {
            return Err(InvalidSubmissionId::Empty);
        }
        if raw.len() > MAX_SUBMISSION_ID_LEN {
            return Err(InvalidSubmissionId::TooLong);
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(InvalidSubmissionId::InvalidChar(c));
        }
        Ok(Self(raw.to_string()))
    }

    /// Generate a random unique id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubmissionId {
    type Error = InvalidSubmissionId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SubmissionId> for String {
    fn from(id: SubmissionId) -> Self {
        id.0
    }
}

/// Audio content types accepted at ingress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Mp4,
    Mpeg,
    Wav,
    Ogg,
    Webm,
    Aac,
    Flac,
    OctetStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported content type: {0}")]
pub struct UnsupportedFormat(pub String);

impl AudioFormat {
    pub const ALL: [AudioFormat; 8] = [
        Self::Mp4,
        Self::Mpeg,
        Self::Wav,
        Self::Ogg,
        Self::Webm,
        Self::Aac,
        Self::Flac,
        Self::OctetStream,
    ];

    /// Canonical MIME type
    pub fn mime(self) -> &'static str {
        match self {
            Self::Mp4 => "audio/mp4",
            Self::Mpeg => "audio/mpeg",
            Self::Wav => "audio/wav",
            Self::Ogg => "audio/ogg",
            Self::Webm => "audio/webm",
            Self::Aac => "audio/aac",
            Self::Flac => "audio/flac",
            Self::OctetStream => "application/octet-stream",
        }
    }

    /// File extension used for backups and scratch files
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "m4a",
            Self::Mpeg => "mp3",
            Self::Wav => "wav",
            Self::Ogg => "ogg",
            Self::Webm => "webm",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::OctetStream => "bin",
        }
    }

    /// Parse a `Content-Type` header value.
    ///
    /// Parameters such as `; codecs=opus` are ignored and matching is
    /// case-insensitive. A handful of aliases browsers and recorders emit are
    /// folded onto the canonical types.
    pub fn from_content_type(value: &str) -> Result<Self, UnsupportedFormat> {
        let essence = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let format = match essence.as_str() {
            "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Self::Mp4,
            "audio/mpeg" | "audio/mp3" => Self::Mpeg,
            "audio/wav" | "audio/wave" | "audio/x-wav" => Self::Wav,
            "audio/ogg" => Self::Ogg,
            "audio/webm" => Self::Webm,
            "audio/aac" => Self::Aac,
            "audio/flac" | "audio/x-flac" => Self::Flac,
            "application/octet-stream" => Self::OctetStream,
            _ => return Err(UnsupportedFormat(value.trim().to_string())),
        };

        Ok(format)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

impl FromStr for AudioFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_content_type(s)
    }
}

/// Audio as it arrived at ingress, not yet decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioPayload {
    /// Raw request body
    Raw(Vec<u8>),

    /// Base64 text from a JSON upload envelope
    Base64(String),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("audio payload is empty")]
    Empty,

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl AudioPayload {
    /// Decode into the byte buffer handed to the transcriber
    pub fn decode(self) -> Result<Vec<u8>, PayloadError> {
        let bytes = match self {
            Self::Raw(bytes) => bytes,
            Self::Base64(text) => base64::engine::general_purpose::STANDARD
                .decode(text.trim().as_bytes())?,
        };

        if bytes.is_empty() {
            return Err(PayloadError::Empty);
        }
        Ok(bytes)
    }

    /// Size of the encoded payload in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Raw(bytes) => bytes.len(),
            Self::Base64(text) => text.len(),
        }
    }

    /// Bytes used for content hashing (the encoded form)
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Raw(bytes) => bytes,
            Self::Base64(text) => text.as_bytes(),
        }
    }

    /// SHA256 of the encoded payload, hex encoded.
    ///
    /// Identifies which upload a queue item, job record or result belongs to.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// One accepted recording on its way to the worker
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: SubmissionId,
    pub format: AudioFormat,
    pub payload: AudioPayload,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(id: SubmissionId, format: AudioFormat, payload: AudioPayload) -> Self {
        Self {
            id,
            format,
            payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_id_validation() {
        assert!(SubmissionId::parse("abc123").is_ok());
        assert!(SubmissionId::parse("rec_2024-06-01").is_ok());

        assert_eq!(SubmissionId::parse(""), Err(InvalidSubmissionId::Empty));
        assert_eq!(
            SubmissionId::parse("../etc"),
            Err(InvalidSubmissionId::InvalidChar('.'))
        );
        assert_eq!(
            SubmissionId::parse("a/b"),
            Err(InvalidSubmissionId::InvalidChar('/'))
        );
        assert_eq!(
            SubmissionId::parse(&"x".repeat(MAX_SUBMISSION_ID_LEN + 1)),
            Err(InvalidSubmissionId::TooLong)
        );
    }

    #[test]
    fn test_generated_ids_are_unique_and_valid() {
        let a = SubmissionId::generate();
        let b = SubmissionId::generate();

        assert_ne!(a, b);
        assert!(SubmissionId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_content_type_parsing() {
        assert_eq!(AudioFormat::from_content_type("audio/wav"), Ok(AudioFormat::Wav));
        assert_eq!(
            AudioFormat::from_content_type("audio/webm; codecs=opus"),
            Ok(AudioFormat::Webm)
        );
        assert_eq!(AudioFormat::from_content_type("Audio/MPEG"), Ok(AudioFormat::Mpeg));
        assert_eq!(AudioFormat::from_content_type("audio/x-m4a"), Ok(AudioFormat::Mp4));
        assert!(AudioFormat::from_content_type("text/plain").is_err());
        assert!(AudioFormat::from_content_type("").is_err());
    }

    #[test]
    fn test_every_format_round_trips_through_its_mime() {
        for format in AudioFormat::ALL {
            assert_eq!(AudioFormat::from_content_type(format.mime()), Ok(format));
        }
    }

    #[test]
    fn test_payload_decoding() {
        let raw = AudioPayload::Raw(b"RIFF".to_vec());
        assert_eq!(raw.decode().unwrap(), b"RIFF");

        let encoded = AudioPayload::Base64("UklGRg==\n".to_string());
        assert_eq!(encoded.decode().unwrap(), b"RIFF");

        assert!(matches!(
            AudioPayload::Base64("not base64!".to_string()).decode(),
            Err(PayloadError::Base64(_))
        ));
        assert!(matches!(
            AudioPayload::Raw(Vec::new()).decode(),
            Err(PayloadError::Empty)
        ));
    }

    #[test]
    fn test_content_hash_tracks_the_encoded_bytes() {
        let a = AudioPayload::Raw(b"RIFF one".to_vec());
        let b = AudioPayload::Raw(b"RIFF two".to_vec());

        assert_eq!(a.content_hash(), a.clone().content_hash());
        assert_ne!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 64);
    }
}
