//! Pipeline worker.
//!
//! Runs one submission through materialize → transcribe → generate → persist.
//! Backups and state records are best-effort; writing `results/{id}.json` is
//! the only write that decides whether the job completed.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, instrument};

use super::backup::BackupSink;
use super::retry::RetryPolicy;
use super::scratch::{ScratchFile, ScratchSpace};
use crate::adapters::{AudioInput, Generator, Transcriber};
use crate::domain::{
    ArtifactKey, JobRecord, JobState, PromptTemplate, Prompts, Stage, Submission, SubmissionId,
    SubmissionResult, TemplateKind,
};
use crate::store::ArtifactStore;

/// Why a run stopped
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to materialize audio: {0}")]
    Materialize(String),

    #[error("transcription failed: {0}")]
    Transcribe(String),

    #[error("{template} generation failed after {attempts} attempt(s): {message}")]
    Generate {
        template: TemplateKind,
        attempts: u32,
        message: String,
    },

    #[error("failed to write final result: {0}")]
    Persist(String),
}

impl StageError {
    /// Stage the error belongs to
    pub fn stage(&self) -> Stage {
        match self {
            Self::Materialize(_) => Stage::Materialize,
            Self::Transcribe(_) => Stage::Transcribe,
            Self::Generate { .. } => Stage::Generate,
            Self::Persist(_) => Stage::Persist,
        }
    }
}

/// Executes the stage sequence for one submission at a time.
///
/// Cheap to clone; every dependency is shared.
#[derive(Clone)]
pub struct Worker {
    store: Arc<dyn ArtifactStore>,
    journal: BackupSink,
    backups: BackupSink,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn Generator>,
    prompts: Arc<Prompts>,
    scratch: Arc<dyn ScratchSpace>,
    retry: RetryPolicy,
}

impl Worker {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        transcriber: Arc<dyn Transcriber>,
        generator: Arc<dyn Generator>,
        scratch: Arc<dyn ScratchSpace>,
    ) -> Self {
        Self {
            journal: BackupSink::new(store.clone()),
            store,
            backups: BackupSink::disabled(),
            transcriber,
            generator,
            prompts: Arc::new(Prompts::builtin()),
            scratch,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_backups(mut self, backups: BackupSink) -> Self {
        self.backups = backups;
        self
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = Arc::new(prompts);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Store holding results and state records
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Run every stage for `submission`.
    ///
    /// Errors are logged and journaled here; callers only decide what to do
    /// with the outcome (nothing, for in-process dispatch).
    #[instrument(skip(self, submission), fields(submission_id = %submission.id))]
    pub async fn process(&self, submission: Submission) -> Result<SubmissionResult, StageError> {
        let id = submission.id.clone();
        let mut record = JobRecord::new(id.clone()).with_payload_hash(submission.payload.content_hash());
        self.write_state(&record).await;

        info!(
            format = %submission.format,
            payload_bytes = submission.payload.encoded_len(),
            "Processing submission"
        );

        let outcome = self.run_stages(submission, &mut record).await;

        match &outcome {
            Ok(_) => {
                record.advance(JobState::Completed);
                info!(elapsed_ms = record.elapsed_ms(), "Submission completed");
            }
            Err(e) => {
                record.fail(e.stage(), e.to_string());
                error!(
                    stage = %e.stage(),
                    error = %e,
                    elapsed_ms = record.elapsed_ms(),
                    "Submission failed"
                );
            }
        }
        self.write_state(&record).await;

        outcome
    }

    async fn run_stages(
        &self,
        submission: Submission,
        record: &mut JobRecord,
    ) -> Result<SubmissionResult, StageError> {
        let id = submission.id;
        let format = submission.format;

        // Materialize
        let audio = submission
            .payload
            .decode()
            .map_err(|e| StageError::Materialize(e.to_string()))?;
        let scratch = ScratchFile::create(
            self.scratch.clone(),
            &format!("{}.{}", id, format.extension()),
            &audio,
        )
        .await
        .map_err(|e| StageError::Materialize(format!("scratch write failed: {}", e)))?;
        self.backups
            .record(&id, &ArtifactKey::audio(&id, format), &audio)
            .await;

        // Transcribe
        self.enter(record, JobState::Transcribing).await;
        let started = Instant::now();
        let raw = self
            .transcriber
            .transcribe(AudioInput {
                bytes: &audio,
                format,
                path: scratch.path(),
            })
            .await;
        scratch.release().await;
        let raw = raw.map_err(|e| StageError::Transcribe(format!("{:#}", e)))?;

        let transcript = raw.trim().to_string();
        if transcript.is_empty() {
            return Err(StageError::Transcribe("transcription was empty".to_string()));
        }
        info!(
            transcriber = self.transcriber.name(),
            chars = transcript.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Transcription complete"
        );
        self.backups
            .record(&id, &ArtifactKey::transcript(&id), transcript.as_bytes())
            .await;

        // Generate
        self.enter(record, JobState::Generating).await;
        let started = Instant::now();
        let (greenpaper, mp) = tokio::join!(
            self.generate(&id, &self.prompts.greenpaper, &transcript),
            self.generate(&id, &self.prompts.mp, &transcript),
        );
        let result = SubmissionResult {
            greenpaper_output: greenpaper?,
            mp_output: mp?,
        };
        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "Generation complete"
        );

        // Persist
        self.backups
            .record(&id, &ArtifactKey::email(&id), result.combined().as_bytes())
            .await;
        self.persist(&id, &result).await?;

        Ok(result)
    }

    async fn generate(
        &self,
        id: &SubmissionId,
        template: &PromptTemplate,
        transcript: &str,
    ) -> Result<String, StageError> {
        let started = Instant::now();

        let output = self
            .retry
            .run(template.kind().as_str(), move || async move {
                let text = self.generator.generate(template, transcript).await?;
                let text = text.trim();
                if text.is_empty() {
                    anyhow::bail!("generator returned no text");
                }
                Ok(text.to_string())
            })
            .await
            .map_err(|(e, attempts)| StageError::Generate {
                template: template.kind(),
                attempts,
                message: format!("{:#}", e),
            })?;

        info!(
            submission_id = %id,
            template = %template.kind(),
            generator = self.generator.name(),
            chars = output.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Generated email"
        );

        Ok(output)
    }

    async fn persist(&self, id: &SubmissionId, result: &SubmissionResult) -> Result<(), StageError> {
        let key = ArtifactKey::result(id);
        let json = serde_json::to_vec_pretty(result)
            .map_err(|e| StageError::Persist(e.to_string()))?;

        self.store
            .put(key.as_str(), json, key.content_type())
            .await
            .map_err(|e| StageError::Persist(e.to_string()))
    }

    async fn enter(&self, record: &mut JobRecord, state: JobState) {
        record.advance(state);
        info!(state = ?state, "Stage started");
        self.write_state(record).await;
    }

    async fn write_state(&self, record: &JobRecord) {
        let key = ArtifactKey::state(&record.submission_id);
        match serde_json::to_vec_pretty(record) {
            Ok(json) => self.journal.record(&record.submission_id, &key, &json).await,
            Err(e) => error!(submission_id = %record.submission_id, error = %e, "Failed to encode job state"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scratch::TempScratch;
    use crate::domain::{AudioFormat, AudioPayload};
    use crate::store::MemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;

    struct FixedTranscriber(&'static str);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn transcribe(&self, audio: AudioInput<'_>) -> Result<String> {
            assert!(audio.path.exists());
            Ok(self.0.to_string())
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, template: &PromptTemplate, text: &str) -> Result<String> {
            Ok(format!("  {}: {}  ", template.kind(), text))
        }
    }

    fn worker(store: &MemoryStore, transcript: &'static str) -> Worker {
        Worker::new(
            Arc::new(store.clone()),
            Arc::new(FixedTranscriber(transcript)),
            Arc::new(EchoGenerator),
            Arc::new(TempScratch::new().unwrap()),
        )
        .with_backups(BackupSink::new(Arc::new(store.clone())))
    }

    fn submission(payload: AudioPayload) -> Submission {
        Submission::new(SubmissionId::parse("abc123").unwrap(), AudioFormat::Wav, payload)
    }

    #[tokio::test]
    async fn test_successful_run_writes_all_artifacts() {
        let store = MemoryStore::new();
        let result = worker(&store, "  save our libraries \n")
            .process(submission(AudioPayload::Raw(b"RIFF".to_vec())))
            .await
            .unwrap();

        assert_eq!(result.greenpaper_output, "greenpaper: save our libraries");
        assert_eq!(result.mp_output, "mp: save our libraries");
        assert_eq!(
            store.keys(),
            vec![
                "audio/abc123.wav",
                "email/abc123.txt",
                "results/abc123.json",
                "state/abc123.json",
                "transcript/abc123.txt",
            ]
        );
        assert_eq!(
            store.text("transcript/abc123.txt").as_deref(),
            Some("save our libraries")
        );

        let state: JobRecord =
            serde_json::from_str(&store.text("state/abc123.json").unwrap()).unwrap();
        assert_eq!(state.state, JobState::Completed);
    }

    #[tokio::test]
    async fn test_bad_base64_fails_materialize() {
        let store = MemoryStore::new();
        let err = worker(&store, "text")
            .process(submission(AudioPayload::Base64("not base64!!".to_string())))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Materialize);
        assert!(store.object("results/abc123.json").is_none());

        let state: JobRecord =
            serde_json::from_str(&store.text("state/abc123.json").unwrap()).unwrap();
        assert_eq!(state.state, JobState::Failed);
        assert_eq!(state.failed_stage, Some(Stage::Materialize));
    }

    #[tokio::test]
    async fn test_blank_transcript_is_a_transcription_failure() {
        let store = MemoryStore::new();
        let err = worker(&store, "   ")
            .process(submission(AudioPayload::Raw(b"RIFF".to_vec())))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Transcribe);
        assert!(store.object("transcript/abc123.txt").is_none());
        assert!(store.object("results/abc123.json").is_none());
    }

    #[tokio::test]
    async fn test_backups_disabled_still_writes_result_and_state() {
        let store = MemoryStore::new();
        let worker = Worker::new(
            Arc::new(store.clone()),
            Arc::new(FixedTranscriber("hello")),
            Arc::new(EchoGenerator),
            Arc::new(TempScratch::new().unwrap()),
        );

        worker
            .process(submission(AudioPayload::Raw(b"RIFF".to_vec())))
            .await
            .unwrap();

        assert_eq!(store.keys(), vec!["results/abc123.json", "state/abc123.json"]);
    }

    #[tokio::test]
    async fn test_state_record_names_the_processed_upload() {
        let store = MemoryStore::new();
        let payload = AudioPayload::Raw(b"RIFF v1".to_vec());
        let hash = payload.content_hash();

        worker(&store, "hello")
            .process(submission(payload))
            .await
            .unwrap();

        let record: JobRecord =
            serde_json::from_str(&store.text("state/abc123.json").unwrap()).unwrap();
        assert!(record.completed_for(&hash));
    }
}
