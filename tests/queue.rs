//! Queue Integration Tests
//!
//! Ingress → queue dispatcher → on-disk queue → consumer → worker.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedGenerator, ScriptedTranscriber, TrackingScratch};
use pathways::core::{JobStatus, QueueDispatcher, StatusReader};
use pathways::domain::{AudioFormat, AudioPayload, Submission, SubmissionId};
use pathways::ingest::{
    DrainSummary, EnqueueResult, ItemStatus, PollOutcome, QueueConsumer, QueueOptions, SubmissionIngress,
    SubmissionQueue,
};
use pathways::store::MemoryStore;
use tempfile::TempDir;

async fn open_queue(dir: &TempDir, options: QueueOptions) -> Arc<SubmissionQueue> {
    Arc::new(SubmissionQueue::open(dir.path(), options).await.unwrap())
}

#[tokio::test]
async fn test_queued_uploads_are_drained_by_consumer() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(&temp, QueueOptions::default()).await;
    let ingress = SubmissionIngress::new(Arc::new(QueueDispatcher::new(queue.clone())));

    ingress
        .accept(Some("first"), Some("audio/wav"), b"RIFF one".to_vec())
        .await
        .unwrap();
    ingress
        .accept(
            Some("second"),
            Some("application/json"),
            br#"{"audio_file":"UklGRiQAAABXQVZF","content_type":"audio/wav"}"#.to_vec(),
        )
        .await
        .unwrap();

    assert_eq!(queue.status().await.unwrap().pending, 2);

    let store = MemoryStore::new();
    let generator = Arc::new(ScriptedGenerator::new(Duration::ZERO));
    let worker = common::worker(
        &store,
        Arc::new(ScriptedTranscriber::ok("queue transcript")),
        generator.clone(),
        Arc::new(TrackingScratch::new()),
    );
    let consumer = QueueConsumer::new(queue.clone(), worker);

    let summary = consumer.drain().await.unwrap();
    assert_eq!(
        summary,
        DrainSummary {
            completed: 2,
            skipped: 0,
            failed: 0
        }
    );
    assert_eq!(generator.calls.load(Ordering::SeqCst), 4);

    let status = queue.status().await.unwrap();
    assert_eq!(status.done, 2);
    assert_eq!(status.pending, 0);

    assert!(store.object("results/first.json").is_some());
    assert_eq!(&store.object("audio/second.wav").unwrap().bytes[..4], b"RIFF");

    let reader = StatusReader::new(Arc::new(store.clone()));
    for id in ["first", "second"] {
        let status = reader.status(&SubmissionId::parse(id).unwrap()).await.unwrap();
        assert!(status.is_completed(), "{} not completed", id);
    }

    // Nothing left to do
    assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn test_redelivery_with_existing_result_is_skipped() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(
        &temp,
        QueueOptions {
            visibility_timeout: Duration::ZERO,
            max_deliveries: 3,
            ..Default::default()
        },
    )
    .await;

    let submission = Submission::new(
        SubmissionId::parse("crashy").unwrap(),
        AudioFormat::Ogg,
        AudioPayload::Raw(b"OggS".to_vec()),
    );
    queue.enqueue(submission).await.unwrap();

    // A previous consumer claimed it, wrote the result, and died before acking
    let store = MemoryStore::new();
    let generator = Arc::new(ScriptedGenerator::new(Duration::ZERO));
    let worker = common::worker(
        &store,
        Arc::new(ScriptedTranscriber::ok("hello")),
        generator.clone(),
        Arc::new(TrackingScratch::new()),
    );
    let first = queue.claim("dead-worker").await.unwrap().unwrap();
    assert_eq!(first.attempt, 1);
    worker.process(first.submission).await.unwrap();
    let calls_before = generator.calls.load(Ordering::SeqCst);

    let consumer = QueueConsumer::new(queue.clone(), worker);
    assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Skipped);

    assert_eq!(generator.calls.load(Ordering::SeqCst), calls_before);
    let item = queue.get("crashy").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Done);
    assert_eq!(item.deliveries, 2);
}

#[tokio::test]
async fn test_failed_pipeline_marks_item_failed() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(&temp, QueueOptions::default()).await;
    queue
        .enqueue(Submission::new(
            SubmissionId::parse("nope").unwrap(),
            AudioFormat::Mpeg,
            AudioPayload::Raw(b"ID3".to_vec()),
        ))
        .await
        .unwrap();

    let store = MemoryStore::new();
    let worker = common::worker(
        &store,
        Arc::new(ScriptedTranscriber::failing("no speech detected")),
        Arc::new(ScriptedGenerator::new(Duration::ZERO)),
        Arc::new(TrackingScratch::new()),
    );
    let consumer = QueueConsumer::new(queue.clone(), worker);

    assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Failed);

    let item = queue.get("nope").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item.error.unwrap().contains("no speech detected"));

    let status = StatusReader::new(Arc::new(store.clone()))
        .status(&SubmissionId::parse("nope").unwrap())
        .await
        .unwrap();
    assert!(matches!(status, JobStatus::Failed { .. }));

    // Failed items are not redelivered
    assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Idle);
}

#[tokio::test]
async fn test_duplicate_upload_runs_once() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(&temp, QueueOptions::default()).await;
    let ingress = SubmissionIngress::new(Arc::new(QueueDispatcher::new(queue.clone())));

    for _ in 0..3 {
        ingress
            .accept(Some("dup"), Some("audio/webm"), b"same bytes".to_vec())
            .await
            .unwrap();
    }

    let store = MemoryStore::new();
    let transcriber = Arc::new(ScriptedTranscriber::ok("hello"));
    let worker = common::worker(
        &store,
        transcriber.clone(),
        Arc::new(ScriptedGenerator::new(Duration::ZERO)),
        Arc::new(TrackingScratch::new()),
    );
    let summary = QueueConsumer::new(queue.clone(), worker).drain().await.unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.status().await.unwrap().total(), 1);
}

fn upload(id: &str, audio: &[u8]) -> Submission {
    Submission::new(
        SubmissionId::parse(id).unwrap(),
        AudioFormat::Wav,
        AudioPayload::Raw(audio.to_vec()),
    )
}

#[tokio::test]
async fn test_redelivered_replacement_audio_is_processed() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(
        &temp,
        QueueOptions {
            visibility_timeout: Duration::ZERO,
            ..Default::default()
        },
    )
    .await;

    let store = MemoryStore::new();
    let transcriber = Arc::new(ScriptedTranscriber::ok("hello"));
    let worker = common::worker(
        &store,
        transcriber.clone(),
        Arc::new(ScriptedGenerator::new(Duration::ZERO)),
        Arc::new(TrackingScratch::new()),
    );
    let consumer = QueueConsumer::new(queue.clone(), worker);

    queue.enqueue(upload("abc123", b"RIFF v1")).await.unwrap();
    assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Completed);

    let replaced = queue.enqueue(upload("abc123", b"RIFF v2")).await.unwrap();
    assert_eq!(replaced, EnqueueResult::Replaced("abc123".to_string()));

    // A consumer claims the new audio and dies before doing anything
    let abandoned = queue.claim("dead-worker").await.unwrap().unwrap();
    assert_eq!(abandoned.attempt, 1);

    // The old result must not satisfy the redelivery
    assert_eq!(consumer.poll_once().await.unwrap(), PollOutcome::Completed);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.object("audio/abc123.wav").unwrap().bytes, b"RIFF v2");

    let item = queue.get("abc123").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Done);
}

#[tokio::test]
async fn test_audio_replaced_mid_run_is_processed_next() {
    let temp = TempDir::new().unwrap();
    let queue = open_queue(&temp, QueueOptions::default()).await;

    let store = MemoryStore::new();
    let transcriber = Arc::new(ScriptedTranscriber::ok("hello"));
    let worker = common::worker(
        &store,
        transcriber.clone(),
        Arc::new(ScriptedGenerator::new(Duration::from_millis(300))),
        Arc::new(TrackingScratch::new()),
    );
    let consumer = Arc::new(QueueConsumer::new(queue.clone(), worker));

    queue.enqueue(upload("abc123", b"RIFF v1")).await.unwrap();
    let running = {
        let consumer = consumer.clone();
        tokio::spawn(async move { consumer.poll_once().await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let replaced = queue.enqueue(upload("abc123", b"RIFF v2")).await.unwrap();
    assert_eq!(replaced, EnqueueResult::Replaced("abc123".to_string()));

    // The first run finishes without disturbing the queued replacement
    assert_eq!(running.await.unwrap().unwrap(), PollOutcome::Completed);
    let item = queue.get("abc123").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);

    let summary = consumer.drain().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(transcriber.calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.object("audio/abc123.wav").unwrap().bytes, b"RIFF v2");

    let item = queue.get("abc123").await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Done);
}
