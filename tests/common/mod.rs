//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use pathways::adapters::{AudioInput, Generator, Transcriber};
use pathways::core::dispatcher::{DispatchError, Dispatcher};
use pathways::core::{RetryPolicy, ScratchSpace, TempScratch, Worker};
use pathways::domain::{PromptTemplate, Submission, TemplateKind};
use pathways::store::MemoryStore;

/// Transcriber returning a fixed outcome
pub struct ScriptedTranscriber {
    outcome: Result<String, String>,
    pub calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn ok(text: &str) -> Self {
        Self {
            outcome: Ok(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(&self, audio: AudioInput<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(audio.path.exists(), "scratch copy must exist during transcription");
        match &self.outcome {
            Ok(text) => Ok(text.clone()),
            Err(message) => anyhow::bail!("{}", message),
        }
    }
}

/// Generator that sleeps, then echoes the template kind and transcript.
///
/// Templates listed in `failing` fail their first `failures` calls (or every
/// call when `failures` is `usize::MAX`).
pub struct ScriptedGenerator {
    pub delay: Duration,
    pub failing: Vec<TemplateKind>,
    pub failures: usize,
    pub calls: AtomicUsize,
    failed: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failing: Vec::new(),
            failures: 0,
            calls: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, kind: TemplateKind, failures: usize) -> Self {
        self.failing.push(kind);
        self.failures = failures;
        self
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, template: &PromptTemplate, text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        if self.failing.contains(&template.kind())
            && self.failed.fetch_add(1, Ordering::SeqCst) < self.failures
        {
            anyhow::bail!("upstream overloaded");
        }

        Ok(format!("{} email about: {}\n", template.kind(), text))
    }
}

/// Scratch space that records every file it creates and removes
#[derive(Default)]
pub struct TrackingScratch {
    inner: Option<TempScratch>,
    pub created: Mutex<Vec<PathBuf>>,
    pub removed: Mutex<HashSet<PathBuf>>,

    /// Removals that went through the drop fallback
    pub removed_on_drop: AtomicUsize,
}

impl TrackingScratch {
    pub fn new() -> Self {
        Self {
            inner: Some(TempScratch::new().unwrap()),
            ..Default::default()
        }
    }

    /// Created files that were never removed or still exist on disk
    pub fn leaked(&self) -> Vec<PathBuf> {
        let removed = self.removed.lock().unwrap();
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|p| !removed.contains(*p) || p.exists())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ScratchSpace for TrackingScratch {
    async fn create(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.inner.as_ref().unwrap().create(name, bytes).await?;
        self.created.lock().unwrap().push(path.clone());
        Ok(path)
    }

    async fn remove(&self, path: &Path) -> io::Result<()> {
        self.inner.as_ref().unwrap().remove(path).await?;
        self.removed.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    fn remove_now(&self, path: &Path) -> io::Result<()> {
        self.inner.as_ref().unwrap().remove_now(path)?;
        self.removed.lock().unwrap().insert(path.to_path_buf());
        self.removed_on_drop.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Dispatcher that only counts calls
#[derive(Default)]
pub struct CountingDispatcher {
    pub dispatched: Mutex<Vec<Submission>>,
}

#[async_trait]
impl Dispatcher for CountingDispatcher {
    fn mode(&self) -> &'static str {
        "counting"
    }

    async fn dispatch(&self, submission: Submission) -> Result<(), DispatchError> {
        self.dispatched.lock().unwrap().push(submission);
        Ok(())
    }
}

/// Retry policy with millisecond delays
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay_ms: 5,
        max_delay_ms: 20,
        backoff_multiplier: 2.0,
    }
}

/// Worker over a memory store with the given doubles
pub fn worker(
    store: &MemoryStore,
    transcriber: Arc<dyn Transcriber>,
    generator: Arc<dyn Generator>,
    scratch: Arc<dyn ScratchSpace>,
) -> Worker {
    Worker::new(Arc::new(store.clone()), transcriber, generator, scratch)
        .with_backups(pathways::core::BackupSink::new(Arc::new(store.clone())))
        .with_retry(fast_retry(3))
}
