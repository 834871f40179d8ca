//! Record Store for memento-gather
//!
//! Handles SQLite persistence for discovered CDX records and the two outcome
//! tables that resolve them.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`records`]: CDX record ingest and the id-ordered backlog scan
//! - [`outcomes`]: Dedup queries and single-record terminal writes
//!
//! Every record id has at most one terminal row: either a [`MementoSpecimen`]
//! or a failure marker. Both tables use the record id as primary key and the
//! schema rejects a second terminal row for the same id.

use crate::types::RecordId;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

mod migrations;
mod outcomes;
mod records;

/// A discovered index entry, read-only to the gathering pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdxRecordSpecimen {
    /// Surrogate id assigned at discovery
    pub id: RecordId,
    /// SHA-256 hex digest of the raw URL (discovery-time dedup key)
    pub hash_raw_url: String,
    /// SURT-style index key
    pub key: String,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Original URL of the capture
    pub url: String,
    /// MIME type reported by the index
    pub mime_type: String,
    /// HTTP status code reported by the index
    pub status_code: Option<i64>,
    /// Content digest reported by the index
    pub digest: String,
    /// Capture length in bytes
    pub length: Option<i64>,
    /// Raw playback URL
    pub raw_url: String,
    /// Human-viewable playback URL
    pub view_url: String,
}

/// New CDX record produced by discovery, before an id is assigned
#[derive(Debug, Clone)]
pub struct NewCdxRecord {
    /// SURT-style index key
    pub key: String,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Original URL of the capture
    pub url: String,
    /// MIME type reported by the index
    pub mime_type: String,
    /// HTTP status code reported by the index
    pub status_code: Option<i64>,
    /// Content digest reported by the index
    pub digest: String,
    /// Capture length in bytes
    pub length: Option<i64>,
    /// Raw playback URL
    pub raw_url: String,
    /// Human-viewable playback URL
    pub view_url: String,
}

/// A successfully gathered page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MementoSpecimen {
    /// Same id as the source record
    pub id: RecordId,
    /// SHA-256 hex digest of the raw URL
    pub hash_raw_url: String,
    /// Raw playback URL
    pub raw_url: String,
    /// Original URL of the capture
    pub url: String,
    /// MIME type reported by the index
    pub mime_type: String,
    /// HTTP status code reported by the index
    pub status_code: Option<i64>,
    /// Capture timestamp
    pub time: DateTime<Utc>,
    /// Human-viewable playback URL
    pub view_url: String,
    /// Fetched content
    pub html_content: Vec<u8>,
}

impl MementoSpecimen {
    /// Build a specimen from its source record and the fetched content
    pub fn from_record(record: &CdxRecordSpecimen, html_content: Vec<u8>) -> Self {
        Self {
            id: record.id,
            hash_raw_url: record.hash_raw_url.clone(),
            raw_url: record.raw_url.clone(),
            url: record.url.clone(),
            mime_type: record.mime_type.clone(),
            status_code: record.status_code,
            time: record.timestamp,
            view_url: record.view_url.clone(),
            html_content,
        }
    }
}

/// A terminal row staged by a worker task, written in one transaction
#[derive(Debug, Clone)]
pub enum TerminalRow {
    /// Store the gathered page
    Memento(MementoSpecimen),
    /// Mark the record as permanently failed
    Failure(RecordId),
}

impl TerminalRow {
    /// Record id this row resolves
    pub fn id(&self) -> RecordId {
        match self {
            TerminalRow::Memento(m) => m.id,
            TerminalRow::Failure(id) => *id,
        }
    }
}

/// Outcome tables that resolve a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeTable {
    /// `memento_specimen`
    Gathered,
    /// `memento_failure`
    Failed,
}

impl OutcomeTable {
    /// SQL table name
    pub fn table_name(&self) -> &'static str {
        match self {
            OutcomeTable::Gathered => "memento_specimen",
            OutcomeTable::Failed => "memento_failure",
        }
    }
}

/// Row counts of the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Discovered CDX records
    pub records: i64,
    /// Gathered mementos
    pub gathered: i64,
    /// Permanent failures
    pub failed: i64,
}

impl StoreStats {
    /// Records that have neither outcome row (includes excluded records)
    pub fn unresolved(&self) -> i64 {
        self.records - self.gathered - self.failed
    }
}

/// Database handle for memento-gather
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
