//! Core types for memento-gather

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::CdxRecordSpecimen;

/// Surrogate identifier of a discovered CDX record
///
/// Assigned at discovery and shared as primary key by the outcome tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    /// Create a new RecordId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<RecordId> for i64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for RecordId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for RecordId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RecordId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RecordId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Status codes at or above this value are never gathered
pub const ERROR_STATUS_THRESHOLD: i64 = 400;

/// Returns true if a stored CDX status code marks the capture as an error
pub fn is_error_status(status_code: Option<i64>) -> bool {
    status_code.is_some_and(|code| code >= ERROR_STATUS_THRESHOLD)
}

/// Transportable form of a [`CdxRecordSpecimen`], the unit of work sent to workers
///
/// The timestamp is carried as RFC 3339 with an explicit offset and always
/// restored as UTC on the worker side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Surrogate record id
    pub id: RecordId,
    /// SHA-256 hex digest of the raw URL
    pub hash_raw_url: String,
    /// SURT-style index key
    pub key: String,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Original URL of the capture
    pub url: String,
    /// MIME type reported by the index
    pub mime_type: String,
    /// HTTP status code reported by the index (None when the index had "-")
    pub status_code: Option<i64>,
    /// Content digest reported by the index
    pub digest: String,
    /// Capture length in bytes
    pub length: Option<i64>,
    /// Raw playback URL of the memento
    pub raw_url: String,
    /// Human-viewable playback URL
    pub view_url: String,
}

impl WorkItem {
    /// Encode for the wire
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from the wire
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

impl From<&CdxRecordSpecimen> for WorkItem {
    fn from(record: &CdxRecordSpecimen) -> Self {
        Self {
            id: record.id,
            hash_raw_url: record.hash_raw_url.clone(),
            key: record.key.clone(),
            timestamp: record.timestamp,
            url: record.url.clone(),
            mime_type: record.mime_type.clone(),
            status_code: record.status_code,
            digest: record.digest.clone(),
            length: record.length,
            raw_url: record.raw_url.clone(),
            view_url: record.view_url.clone(),
        }
    }
}

impl From<WorkItem> for CdxRecordSpecimen {
    fn from(item: WorkItem) -> Self {
        Self {
            id: item.id,
            hash_raw_url: item.hash_raw_url,
            key: item.key,
            timestamp: item.timestamp,
            url: item.url,
            mime_type: item.mime_type,
            status_code: item.status_code,
            digest: item.digest,
            length: item.length,
            raw_url: item.raw_url,
            view_url: item.view_url,
        }
    }
}

/// Classification of one task invocation
///
/// The [`Display`](std::fmt::Display) form is the outcome tag reported back to
/// the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Memento fetched and stored
    Gathered,
    /// Stored status code was an error; nothing attempted, nothing written
    StatusCodeError(i64),
    /// Archive returned a memento that is not ok; failure recorded
    MementoError(u16),
    /// Fetch exceeded the soft time limit; failure recorded
    SoftTimeLimitExceeded(String),
    /// Archive could not play the memento back; failure recorded
    PlaybackError(String),
    /// Unclassified fetch failure; nothing written
    Exception(String),
    /// The terminal row could not be committed; nothing written
    CommitFailed,
}

impl Outcome {
    /// Short machine-readable name, used for tallies
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Gathered => "gathered",
            Outcome::StatusCodeError(_) => "status_code_error",
            Outcome::MementoError(_) => "memento_error",
            Outcome::SoftTimeLimitExceeded(_) => "soft_time_limit_exceeded",
            Outcome::PlaybackError(_) => "playback_error",
            Outcome::Exception(_) => "exception",
            Outcome::CommitFailed => "commit_failed",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Gathered => write!(f, "gathered"),
            Outcome::StatusCodeError(code) => write!(f, "status code error: {}", code),
            Outcome::MementoError(code) => write!(f, "memento error: {}", code),
            Outcome::SoftTimeLimitExceeded(detail) => {
                write!(f, "soft time limit exceeded: {}", detail)
            }
            Outcome::PlaybackError(detail) => write!(f, "memento playback error: {}", detail),
            Outcome::Exception(detail) => write!(f, "exception: {}", detail),
            Outcome::CommitFailed => write!(f, "error while committing"),
        }
    }
}

/// Per-item result collected from a batch: `(id, outcome tag)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Record the task processed
    pub id: RecordId,
    /// How it ended
    pub outcome: Outcome,
}

impl TaskResult {
    /// Create a new result
    pub fn new(id: RecordId, outcome: Outcome) -> Self {
        Self { id, outcome }
    }

    /// Outcome tag string
    pub fn tag(&self) -> String {
        self.outcome.to_string()
    }
}

/// Why the dispatcher left a scanned record out of a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Stored status code ≥ 400
    ErrorStatus,
    /// A MementoSpecimen row already exists
    AlreadyGathered,
    /// A MementoFailure row already exists
    AlreadyFailed,
}

/// Why a dispatched item produced no result
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LostReason {
    /// Task was killed at the hard time limit
    HardTimeLimit,
    /// Connection-reset retries hit the configured cap
    RetriesExhausted(u32),
    /// Task panicked
    Panicked(String),
    /// Work item payload could not be decoded
    Undecodable(String),
}

impl std::fmt::Display for LostReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LostReason::HardTimeLimit => write!(f, "hard time limit exceeded"),
            LostReason::RetriesExhausted(n) => write!(f, "max retries ({}) exceeded", n),
            LostReason::Panicked(msg) => write!(f, "task panicked: {}", msg),
            LostReason::Undecodable(msg) => write!(f, "undecodable work item: {}", msg),
        }
    }
}

/// Events emitted by the dispatcher and the worker pool
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A chunk of the backlog was read and deduplicated
    ChunkScanned {
        /// Offset of the chunk
        offset: u64,
        /// Rows decoded from the chunk
        rows: usize,
        /// Ids in the chunk that already have a MementoSpecimen
        already_gathered: usize,
        /// Ids in the chunk that already have a MementoFailure
        already_failed: usize,
    },

    /// A record was left out of its chunk's batch
    RecordSkipped {
        /// Record id
        id: RecordId,
        /// Why it was skipped
        reason: SkipReason,
    },

    /// A batch was handed to the execution substrate
    BatchSubmitted {
        /// Offset of the chunk the batch came from
        offset: u64,
        /// Number of work items in the batch
        items: usize,
        /// Outstanding batches after this submission
        outstanding: usize,
    },

    /// The dispatcher blocked on and collected the oldest batch
    BatchCollected {
        /// Offset of the chunk the batch came from
        offset: u64,
        /// Results returned
        results: usize,
    },

    /// Collecting a batch failed; its submitted work is not resubmitted
    BatchCollectionFailed {
        /// Offset of the chunk the batch came from
        offset: u64,
        /// Error message
        error: String,
    },

    /// A worker finished a task with a result
    RecordProcessed {
        /// Record id
        id: RecordId,
        /// Outcome tag
        tag: String,
    },

    /// A connection reset scheduled the task to run again
    RetryScheduled {
        /// Record id
        id: RecordId,
        /// Retry number (1 for the first retry)
        attempt: u32,
        /// Delay before the task is re-queued
        countdown: Duration,
    },

    /// A task ended without a result; the record stays unresolved
    RecordLost {
        /// Record id, when the work item could be decoded
        id: Option<RecordId>,
        /// Why no result was produced
        reason: LostReason,
    },
}
