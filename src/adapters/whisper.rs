//! Local whisper transcription backend.
//!
//! Shells out to a whisper binary with the scratch copy of the recording.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

use super::{AudioInput, Transcriber};

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
}

/// Transcriber backed by a local whisper install
pub struct WhisperTranscriber {
    binary_path: String,
    model: String,
    language: Option<String>,
    timeout: Duration,
}

impl WhisperTranscriber {
    pub fn new(binary_path: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            model: model.into(),
            language: None,
            timeout,
        }
    }

    /// Force a language instead of letting whisper detect it
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, audio: AudioInput<'_>) -> Result<String> {
        let output_dir = tempfile::tempdir().context("Failed to create temp dir")?;

        let mut command = Command::new(&self.binary_path);
        command
            .arg(audio.path)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_dir")
            .arg(output_dir.path())
            .arg("--output_format")
            .arg("json");
        if let Some(language) = &self.language {
            command.arg("--language").arg(language);
        }

        let output = timeout(
            self.timeout,
            command
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| format!("whisper timed out after {:?}", self.timeout))?
        .with_context(|| format!("Failed to run whisper at {}", self.binary_path))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("whisper failed: {}", stderr.trim());
        }

        let stem = audio.path.file_stem().unwrap_or_default().to_string_lossy();
        let json_path = output_dir.path().join(format!("{}.json", stem));

        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .context("Failed to read whisper output")?;

        let whisper: WhisperOutput =
            serde_json::from_str(&json_content).context("Failed to parse whisper JSON")?;

        Ok(whisper.text)
    }
}
