//! Status Polling Tests
//!
//! Status is derived from persisted artifacts only, so these drive the
//! in-process dispatcher and watch what a poller would see.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedGenerator, ScriptedTranscriber, TrackingScratch};
use pathways::core::{InProcessDispatcher, JobStatus, StatusReader};
use pathways::domain::{JobRecord, Stage, SubmissionId, SubmissionResult};
use pathways::ingest::SubmissionIngress;
use pathways::store::{ArtifactStore, MemoryStore};

#[tokio::test]
async fn test_polling_moves_from_processing_to_completed() {
    let store = MemoryStore::new();
    let worker = common::worker(
        &store,
        Arc::new(ScriptedTranscriber::ok("Fund the library.")),
        Arc::new(ScriptedGenerator::new(Duration::from_millis(250))),
        Arc::new(TrackingScratch::new()),
    );
    let ingress = SubmissionIngress::new(Arc::new(InProcessDispatcher::new(worker)));
    let reader = StatusReader::new(Arc::new(store.clone()));
    let id = SubmissionId::parse("poll-me").unwrap();

    let ack = ingress
        .accept(Some("poll-me"), Some("audio/wav"), b"RIFF".to_vec())
        .await
        .unwrap();
    assert_eq!(ack.submission_id, id);

    let mut saw_generating = false;
    let completed = loop {
        match reader.status(&id).await.unwrap() {
            JobStatus::Processing { stage } => {
                saw_generating |= stage == Some(Stage::Generate);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            done @ JobStatus::Completed { .. } => break done,
            other => panic!("unexpected status: {:?}", other),
        }
    };
    assert!(saw_generating);

    // Completed is stable and matches the persisted result
    let persisted: SubmissionResult =
        serde_json::from_str(&store.text("results/poll-me.json").unwrap()).unwrap();
    assert_eq!(completed, JobStatus::from(persisted));
    for _ in 0..3 {
        assert_eq!(reader.status(&id).await.unwrap(), completed);
    }
}

#[tokio::test]
async fn test_result_wins_over_stale_failed_state() {
    let store = MemoryStore::new();
    let id = SubmissionId::parse("retried").unwrap();

    // An earlier run failed, a later one completed
    let mut record = JobRecord::new(id.clone());
    record.fail(Stage::Generate, "timeout");
    store
        .put(
            "state/retried.json",
            serde_json::to_vec(&record).unwrap(),
            "application/json",
        )
        .await
        .unwrap();

    let reader = StatusReader::new(Arc::new(store.clone()));
    assert!(matches!(
        reader.status(&id).await.unwrap(),
        JobStatus::Failed {
            stage: Stage::Generate,
            ..
        }
    ));

    let result = SubmissionResult {
        greenpaper_output: "Dear Consultation Team".to_string(),
        mp_output: "Dear MP".to_string(),
    };
    store
        .put(
            "results/retried.json",
            serde_json::to_vec(&result).unwrap(),
            "application/json",
        )
        .await
        .unwrap();

    let json = serde_json::to_value(reader.status(&id).await.unwrap()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "status": "completed",
            "greenpaper_output": "Dear Consultation Team",
            "mp_output": "Dear MP"
        })
    );
}
