//! Adapter interfaces for the remote transcription and generation services.
//!
//! The pipeline treats both as opaque, fallible calls. Implementations:
//! - `OpenAiTranscriber`: hosted speech-to-text over HTTP
//! - `WhisperTranscriber`: local whisper binary
//! - `AnthropicGenerator`: hosted messages API
//! - `CommandGenerator`: local command fed the rendered prompt on stdin

pub mod anthropic;
pub mod command;
pub mod openai;
pub mod whisper;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{AudioFormat, PromptTemplate};

pub use anthropic::{AnthropicConfig, AnthropicGenerator};
pub use command::CommandGenerator;
pub use openai::{OpenAiConfig, OpenAiTranscriber};
pub use whisper::WhisperTranscriber;

/// Materialized audio handed to a transcriber
#[derive(Debug, Clone, Copy)]
pub struct AudioInput<'a> {
    /// Decoded audio bytes
    pub bytes: &'a [u8],

    /// Declared format of the recording
    pub format: AudioFormat,

    /// Scratch copy of the bytes on local disk
    pub path: &'a Path,
}

/// Speech-to-text client
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Transcribe a recording into text
    async fn transcribe(&self, audio: AudioInput<'_>) -> Result<String>;
}

/// Text generation client
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Generate text from a template and the transcript substituted into it
    async fn generate(&self, template: &PromptTemplate, text: &str) -> Result<String>;
}
