//! JSONL-based submission queue for out-of-process dispatch.
//!
//! Append-only event log with state derived from replay. Audio payloads are
//! spooled next to the log. Every read-modify-append runs under an exclusive
//! `fs2` lock so several worker processes can share one queue directory.
//!
//! Delivery is at-least-once: a claimed item whose lease expires is handed
//! out again. Consumers must tolerate seeing the same submission twice.
//!
//! Acknowledgements name the payload that was claimed. If new audio replaced
//! the item in the meantime, the acknowledgement is ignored and the item stays
//! queued for the new audio.
//!
//! The log is compacted into one snapshot event per item once it holds many
//! more events than items. Terminal items older than the retention window are
//! dropped at that point.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{AudioFormat, AudioPayload, Submission, SubmissionId};

const EVENTS_FILE: &str = "events.jsonl";
const LOCK_FILE: &str = "queue.lock";
const PAYLOAD_DIR: &str = "payloads";

/// Logs shorter than this are never compacted
const COMPACT_MIN_EVENTS: usize = 1000;

/// Errors that can occur with the submission queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue item not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition for {id}: {from:?} → {to:?}")]
    InvalidTransition {
        id: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    #[error("Queue task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

/// An event in the queue log (append-only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    pub timestamp: DateTime<Utc>,

    /// Submission id
    pub item_id: String,

    pub event_type: QueueEventType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventType {
    /// Item added (or replaced with a different payload)
    Enqueued,

    /// A worker took the item
    Claimed,

    Completed,

    Failed,

    /// Failed item re-enqueued with the same payload
    ResetForRetry,

    /// Full item state written by compaction
    Snapshot,
}

/// How the spooled payload is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    Raw,
    Base64,
}

/// Metadata recorded with an `enqueued` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItemData {
    pub format: AudioFormat,
    pub encoding: PayloadEncoding,

    /// SHA256 of the encoded payload
    pub payload_hash: String,

    /// Spool file name under `payloads/`
    pub payload_file: String,

    pub payload_bytes: u64,
    pub submitted_at: DateTime<Utc>,
}

/// A queue item with current state (derived from replaying events)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub status: ItemStatus,
    pub data: QueueItemData,

    /// Number of times the item was claimed since it was last (re)enqueued
    pub deliveries: u32,

    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,

    /// Number of resets from failed
    pub retry_count: u32,
}

/// Result of enqueueing an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// New item
    Queued(String),

    /// Same payload already pending or in flight
    AlreadyQueued(String),

    /// Same payload already processed
    AlreadyProcessed(String),

    /// Failed item reset with the same payload
    ResetForRetry(String),

    /// Existing item replaced by a different payload
    Replaced(String),
}

impl EnqueueResult {
    /// Get the item ID regardless of result type
    pub fn id(&self) -> &str {
        match self {
            Self::Queued(id)
            | Self::AlreadyQueued(id)
            | Self::AlreadyProcessed(id)
            | Self::ResetForRetry(id)
            | Self::Replaced(id) => id,
        }
    }

    /// Whether a worker will pick the payload up because of this call
    pub fn will_run(&self) -> bool {
        matches!(self, Self::Queued(_) | Self::ResetForRetry(_) | Self::Replaced(_))
    }
}

/// A claimed item handed to a consumer
#[derive(Debug)]
pub struct Delivery {
    pub submission: Submission,

    /// 1 on first delivery
    pub attempt: u32,

    /// Content hash of the claimed payload; acknowledgements must carry it
    pub payload_hash: String,
}

impl Delivery {
    pub fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }
}

/// What an acknowledgement did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The item moved to its terminal state
    Recorded,

    /// New audio replaced the item after it was claimed; it stays queued
    Superseded,
}

/// Result of a compaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compaction {
    pub kept: usize,
    pub dropped: usize,
}

/// Queue status summary
#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
}

impl QueueStatus {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.done + self.failed
    }
}

/// Lease and redelivery settings
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// How long a claim is honoured before the item is redelivered
    pub visibility_timeout: Duration,

    /// Claims allowed before an item is failed outright
    pub max_deliveries: u32,

    /// How long done and failed items are remembered for deduplication
    pub retention: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(600),
            max_deliveries: 3,
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Directory-backed submission queue
#[derive(Debug, Clone)]
pub struct SubmissionQueue {
    dir: PathBuf,
    options: QueueOptions,
}

impl SubmissionQueue {
    /// Open (creating if needed) a queue rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>, options: QueueOptions) -> Result<Self, QueueError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join(PAYLOAD_DIR)).await?;

        let queue = Self { dir, options };
        let handle = queue.clone();
        tokio::task::spawn_blocking(move || handle.locked(|log| log.maybe_compact())).await??;
        Ok(queue)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Add a submission. Idempotent per (id, payload hash).
    pub async fn enqueue(&self, submission: Submission) -> Result<EnqueueResult, QueueError> {
        let queue = self.clone();
        tokio::task::spawn_blocking(move || queue.locked(|log| log.enqueue(submission))).await?
    }

    /// Claim the oldest deliverable item, if any
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Delivery>, QueueError> {
        let queue = self.clone();
        let worker_id = worker_id.to_string();
        tokio::task::spawn_blocking(move || queue.locked(|log| log.claim(&worker_id))).await?
    }

    /// Mark the claimed payload of an item as done and drop its spool file
    pub async fn complete(&self, id: &SubmissionId, payload_hash: &str) -> Result<Settlement, QueueError> {
        let queue = self.clone();
        let id = id.to_string();
        let hash = payload_hash.to_string();
        tokio::task::spawn_blocking(move || {
            queue.locked(|log| {
                let settlement = log.complete(&id, &hash)?;
                log.maybe_compact()?;
                Ok(settlement)
            })
        })
        .await?
    }

    /// Mark the claimed payload of an item as failed
    pub async fn fail(
        &self,
        id: &SubmissionId,
        payload_hash: &str,
        error: &str,
    ) -> Result<Settlement, QueueError> {
        let queue = self.clone();
        let id = id.to_string();
        let hash = payload_hash.to_string();
        let error = error.to_string();
        tokio::task::spawn_blocking(move || {
            queue.locked(|log| {
                let settlement = log.fail(&id, &hash, &error)?;
                log.maybe_compact()?;
                Ok(settlement)
            })
        })
        .await?
    }

    /// Rewrite the log as one snapshot per item, dropping expired terminal items
    pub async fn compact(&self) -> Result<Compaction, QueueError> {
        let queue = self.clone();
        tokio::task::spawn_blocking(move || {
            queue.locked(|log| {
                let (items, _) = log.load()?;
                log.compact(items)
            })
        })
        .await?
    }

    /// Get a specific item by ID
    pub async fn get(&self, id: &str) -> Result<Option<QueueItem>, QueueError> {
        let queue = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || queue.locked(|log| Ok(log.replay()?.remove(&id))))
            .await?
    }

    /// Get queue status summary
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let queue = self.clone();
        let items = tokio::task::spawn_blocking(move || queue.locked(|log| log.replay())).await??;

        let mut status = QueueStatus::default();
        for item in items.values() {
            match item.status {
                ItemStatus::Pending => status.pending += 1,
                ItemStatus::Processing => status.processing += 1,
                ItemStatus::Done => status.done += 1,
                ItemStatus::Failed => status.failed += 1,
            }
        }
        Ok(status)
    }

    /// Run `f` while holding the queue lock. The lock is released on drop.
    fn locked<T>(&self, f: impl FnOnce(&QueueLog) -> Result<T, QueueError>) -> Result<T, QueueError> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.dir.join(LOCK_FILE))?;
        lock.lock_exclusive()?;

        f(&QueueLog {
            dir: &self.dir,
            options: &self.options,
        })
    }
}

/// Queue operations valid only while the lock is held
struct QueueLog<'a> {
    dir: &'a Path,
    options: &'a QueueOptions,
}

impl QueueLog<'_> {
    fn events_path(&self) -> PathBuf {
        self.dir.join(EVENTS_FILE)
    }

    fn payload_path(&self, file: &str) -> PathBuf {
        self.dir.join(PAYLOAD_DIR).join(file)
    }

    fn append(&self, item_id: &str, event_type: QueueEventType, data: Option<serde_json::Value>) -> Result<(), QueueError> {
        let event = QueueEvent {
            timestamp: Utc::now(),
            item_id: item_id.to_string(),
            event_type,
            data,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())?;

        let json = serde_json::to_string(&event)?;
        writeln!(file, "{}", json)?;
        file.flush()?;

        Ok(())
    }

    fn replay(&self) -> Result<HashMap<String, QueueItem>, QueueError> {
        Ok(self.load()?.0)
    }

    /// Replay the log, also returning how many events it holds
    fn load(&self) -> Result<(HashMap<String, QueueItem>, usize), QueueError> {
        let mut items = HashMap::new();
        let mut events = 0;

        let path = self.events_path();
        if !path.exists() {
            return Ok((items, events));
        }

        let reader = BufReader::new(File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let event: QueueEvent = serde_json::from_str(&line)?;
            apply_event(&mut items, event);
            events += 1;
        }

        Ok((items, events))
    }

    fn maybe_compact(&self) -> Result<(), QueueError> {
        let (items, events) = self.load()?;
        if events >= COMPACT_MIN_EVENTS && events > 2 * items.len() {
            self.compact(items)?;
        }
        Ok(())
    }

    fn compact(&self, items: HashMap<String, QueueItem>) -> Result<Compaction, QueueError> {
        let cutoff = chrono::Duration::from_std(self.options.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));

        let mut kept: Vec<QueueItem> = Vec::with_capacity(items.len());
        let mut dropped = 0;
        for item in items.into_values() {
            let expired = matches!(item.status, ItemStatus::Done | ItemStatus::Failed)
                && matches!((item.completed_at, cutoff), (Some(at), Some(cutoff)) if at < cutoff);

            if expired {
                self.remove_payload(&item.id, &item.data.payload_file);
                dropped += 1;
            } else {
                kept.push(item);
            }
        }
        kept.sort_by(|a, b| a.data.submitted_at.cmp(&b.data.submitted_at));

        let path = self.events_path();
        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            let now = Utc::now();
            for item in &kept {
                let event = QueueEvent {
                    timestamp: now,
                    item_id: item.id.clone(),
                    event_type: QueueEventType::Snapshot,
                    data: Some(serde_json::to_value(item)?),
                };
                writeln!(file, "{}", serde_json::to_string(&event)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        let summary = Compaction {
            kept: kept.len(),
            dropped,
        };
        info!(kept = summary.kept, dropped = summary.dropped, "Compacted queue log");
        Ok(summary)
    }

    fn remove_payload(&self, id: &str, file: &str) {
        let payload = self.payload_path(file);
        if let Err(e) = fs::remove_file(&payload) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(submission_id = %id, path = %payload.display(), error = %e, "Failed to remove spooled payload");
            }
        }
    }

    fn enqueue(&self, submission: Submission) -> Result<EnqueueResult, QueueError> {
        let id = submission.id.to_string();
        let hash = submission.payload.content_hash();

        let items = self.replay()?;
        let replaced = match items.get(&id) {
            Some(existing) if existing.data.payload_hash == hash => {
                return match existing.status {
                    ItemStatus::Done => Ok(EnqueueResult::AlreadyProcessed(id)),
                    ItemStatus::Pending | ItemStatus::Processing => {
                        Ok(EnqueueResult::AlreadyQueued(id))
                    }
                    ItemStatus::Failed => {
                        // Spool may have been cleaned up; rewrite it
                        self.write_payload(&existing.data.payload_file, &submission.payload)?;
                        self.append(&id, QueueEventType::ResetForRetry, None)?;
                        Ok(EnqueueResult::ResetForRetry(id))
                    }
                };
            }
            Some(existing) => Some(existing.data.payload_file.clone()),
            None => None,
        };

        let (encoding, bytes) = match &submission.payload {
            AudioPayload::Raw(bytes) => (PayloadEncoding::Raw, bytes.len()),
            AudioPayload::Base64(text) => (PayloadEncoding::Base64, text.len()),
        };

        let data = QueueItemData {
            format: submission.format,
            encoding,
            payload_file: format!("{}-{}.bin", id, &hash[..12]),
            payload_hash: hash,
            payload_bytes: bytes as u64,
            submitted_at: submission.created_at,
        };

        self.write_payload(&data.payload_file, &submission.payload)?;
        self.append(&id, QueueEventType::Enqueued, Some(serde_json::to_value(&data)?))?;

        if let Some(old_file) = replaced {
            if old_file != data.payload_file {
                self.remove_payload(&id, &old_file);
            }
            Ok(EnqueueResult::Replaced(id))
        } else {
            Ok(EnqueueResult::Queued(id))
        }
    }

    fn write_payload(&self, file: &str, payload: &AudioPayload) -> Result<(), QueueError> {
        let path = self.payload_path(file);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, payload.as_bytes())?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn claim(&self, worker_id: &str) -> Result<Option<Delivery>, QueueError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.options.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));

        let items = self.replay()?;
        let mut candidates: Vec<&QueueItem> = items
            .values()
            .filter(|item| match item.status {
                ItemStatus::Pending => true,
                ItemStatus::Processing => item
                    .claimed_at
                    .map(|at| at + lease <= now)
                    .unwrap_or(true),
                ItemStatus::Done | ItemStatus::Failed => false,
            })
            .collect();

        // Oldest first
        candidates.sort_by(|a, b| a.data.submitted_at.cmp(&b.data.submitted_at));

        for item in candidates {
            if item.deliveries >= self.options.max_deliveries {
                warn!(
                    submission_id = %item.id,
                    deliveries = item.deliveries,
                    "Giving up on submission after repeated deliveries"
                );
                self.append(
                    &item.id,
                    QueueEventType::Failed,
                    Some(serde_json::json!({ "error": "exceeded maximum deliveries" })),
                )?;
                continue;
            }

            let submission = match self.load_submission(item) {
                Ok(submission) => submission,
                Err(e) => {
                    warn!(submission_id = %item.id, error = %e, "Queued payload is unreadable");
                    self.append(
                        &item.id,
                        QueueEventType::Failed,
                        Some(serde_json::json!({ "error": format!("payload unreadable: {}", e) })),
                    )?;
                    continue;
                }
            };

            self.append(
                &item.id,
                QueueEventType::Claimed,
                Some(serde_json::json!({ "worker_id": worker_id })),
            )?;

            let attempt = item.deliveries + 1;
            debug!(submission_id = %item.id, attempt, worker_id, "Claimed submission");

            return Ok(Some(Delivery {
                submission,
                attempt,
                payload_hash: item.data.payload_hash.clone(),
            }));
        }

        Ok(None)
    }

    fn load_submission(&self, item: &QueueItem) -> Result<Submission, QueueError> {
        let id = SubmissionId::parse(&item.id)
            .map_err(|e| QueueError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let bytes = fs::read(self.payload_path(&item.data.payload_file))?;
        let payload = match item.data.encoding {
            PayloadEncoding::Raw => AudioPayload::Raw(bytes),
            PayloadEncoding::Base64 => AudioPayload::Base64(
                String::from_utf8(bytes)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            ),
        };

        Ok(Submission {
            id,
            format: item.data.format,
            payload,
            created_at: item.data.submitted_at,
        })
    }

    fn complete(&self, id: &str, payload_hash: &str) -> Result<Settlement, QueueError> {
        let items = self.replay()?;
        let item = items.get(id).ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if item.data.payload_hash != payload_hash {
            info!(submission_id = %id, "Audio was replaced while processing; keeping the new upload queued");
            return Ok(Settlement::Superseded);
        }

        match item.status {
            ItemStatus::Done => return Ok(Settlement::Recorded),
            ItemStatus::Pending => {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: item.status,
                    to: ItemStatus::Done,
                })
            }
            ItemStatus::Processing | ItemStatus::Failed => {}
        }

        self.append(id, QueueEventType::Completed, None)?;
        self.remove_payload(id, &item.data.payload_file);

        Ok(Settlement::Recorded)
    }

    fn fail(&self, id: &str, payload_hash: &str, error: &str) -> Result<Settlement, QueueError> {
        let items = self.replay()?;
        let item = items.get(id).ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if item.data.payload_hash != payload_hash {
            info!(submission_id = %id, "Audio was replaced while processing; ignoring failure of the old upload");
            return Ok(Settlement::Superseded);
        }

        match item.status {
            ItemStatus::Processing => {}
            // A concurrent delivery already finished it
            ItemStatus::Done | ItemStatus::Failed => return Ok(Settlement::Recorded),
            ItemStatus::Pending => {
                return Err(QueueError::InvalidTransition {
                    id: id.to_string(),
                    from: item.status,
                    to: ItemStatus::Failed,
                })
            }
        }

        self.append(
            id,
            QueueEventType::Failed,
            Some(serde_json::json!({ "error": error })),
        )?;
        Ok(Settlement::Recorded)
    }
}

/// Apply a single event to the state
fn apply_event(items: &mut HashMap<String, QueueItem>, event: QueueEvent) {
    match event.event_type {
        QueueEventType::Enqueued => {
            if let Some(data) = event.data {
                if let Ok(data) = serde_json::from_value::<QueueItemData>(data) {
                    let retry_count = items.get(&event.item_id).map(|i| i.retry_count).unwrap_or(0);
                    items.insert(
                        event.item_id.clone(),
                        QueueItem {
                            id: event.item_id,
                            status: ItemStatus::Pending,
                            data,
                            deliveries: 0,
                            claimed_at: None,
                            claimed_by: None,
                            completed_at: None,
                            error: None,
                            retry_count,
                        },
                    );
                }
            }
        }
        QueueEventType::Claimed => {
            if let Some(item) = items.get_mut(&event.item_id) {
                item.status = ItemStatus::Processing;
                item.deliveries += 1;
                item.claimed_at = Some(event.timestamp);
                item.claimed_by = event
                    .data
                    .as_ref()
                    .and_then(|d| d.get("worker_id"))
                    .and_then(|w| w.as_str())
                    .map(str::to_string);
            }
        }
        QueueEventType::Completed => {
            if let Some(item) = items.get_mut(&event.item_id) {
                item.status = ItemStatus::Done;
                item.completed_at = Some(event.timestamp);
                item.error = None;
            }
        }
        QueueEventType::Failed => {
            if let Some(item) = items.get_mut(&event.item_id) {
                item.status = ItemStatus::Failed;
                item.completed_at = Some(event.timestamp);
                if let Some(error) = event
                    .data
                    .as_ref()
                    .and_then(|d| d.get("error"))
                    .and_then(|e| e.as_str())
                {
                    item.error = Some(error.to_string());
                }
            }
        }
        QueueEventType::Snapshot => {
            if let Some(data) = event.data {
                if let Ok(item) = serde_json::from_value::<QueueItem>(data) {
                    items.insert(event.item_id, item);
                }
            }
        }
        QueueEventType::ResetForRetry => {
            if let Some(item) = items.get_mut(&event.item_id) {
                item.status = ItemStatus::Pending;
                item.retry_count += 1;
                item.deliveries = 0;
                item.error = None;
                item.claimed_at = None;
                item.claimed_by = None;
                item.completed_at = None;
            }
        }
    }
}
