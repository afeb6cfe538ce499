//! OpenAI-compatible transcription client.
//!
//! Uploads the recording as multipart form data to `{base_url}/audio/transcriptions`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use super::{AudioInput, Transcriber};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-transcribe";

/// Configuration for the transcription client
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Response body for `response_format=json`
#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Hosted speech-to-text client
pub struct OpenAiTranscriber {
    url: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiTranscriber {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            anyhow::bail!("OPENAI_API_KEY is required for the openai transcription provider");
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
                .context("Invalid authorization header value")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            url: format!("{}/audio/transcriptions", config.base_url.trim_end_matches('/')),
            model: config.model,
            client,
        })
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    fn name(&self) -> &str {
        "openai"
    }

    async fn transcribe(&self, audio: AudioInput<'_>) -> Result<String> {
        let file_part = Part::bytes(audio.bytes.to_vec())
            .file_name(format!("audio.{}", audio.format.extension()))
            .mime_str(audio.format.mime())?;

        let form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "json");

        debug!(
            url = %self.url,
            model = %self.model,
            bytes = audio.bytes.len(),
            "Sending transcription request"
        );

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            anyhow::bail!("Transcription failed with status {}: {}", status, body.trim());
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;

        Ok(parsed.text)
    }
}
