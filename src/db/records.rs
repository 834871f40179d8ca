//! CDX record ingest and the id-ordered backlog scan.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::DatabaseError;
use crate::types::RecordId;
use crate::utils::url_hash;
use crate::{Error, Result};

use super::{CdxRecordSpecimen, Database, NewCdxRecord, StoreStats};

const RECORD_COLUMNS: &str = "id, hash_raw_url, key, timestamp, url, mime_type, status_code, \
                              digest, length, raw_url, view_url";

impl Database {
    /// Insert a newly discovered CDX record
    ///
    /// The raw URL is hashed into the uniqueness key. Returns `None` when a
    /// record with the same raw URL was already stored.
    pub async fn insert_cdx_record(&self, record: &NewCdxRecord) -> Result<Option<RecordId>> {
        let hash = url_hash(&record.raw_url);

        let result = sqlx::query(
            r#"
            INSERT INTO cdx_record_specimen (
                hash_raw_url, key, timestamp, url, mime_type,
                status_code, digest, length, raw_url, view_url
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash_raw_url) DO NOTHING
            "#,
        )
        .bind(&hash)
        .bind(&record.key)
        .bind(record.timestamp.timestamp())
        .bind(&record.url)
        .bind(&record.mime_type)
        .bind(record.status_code)
        .bind(&record.digest)
        .bind(record.length)
        .bind(&record.raw_url)
        .bind(&record.view_url)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert CDX record: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            tracing::debug!(raw_url = %record.raw_url, "CDX record already stored");
            return Ok(None);
        }

        Ok(Some(RecordId(result.last_insert_rowid())))
    }

    /// Get a CDX record by id
    pub async fn get_cdx_record(&self, id: RecordId) -> Result<Option<CdxRecordSpecimen>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cdx_record_specimen WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get CDX record: {}",
                e
            )))
        })?;

        row.as_ref()
            .map(decode_record)
            .transpose()
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to decode CDX record {}: {}",
                    id, e
                )))
            })
    }

    /// Count all discovered CDX records
    pub async fn count_cdx_records(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cdx_record_specimen")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count CDX records: {}",
                    e
                )))
            })?;

        Ok(count.max(0) as u64)
    }

    /// Read one chunk of the backlog, ordered by id
    ///
    /// Rows that cannot be decoded (for example a status code that is not an
    /// integer) are logged and left out; they never fail the whole chunk.
    pub async fn scan_cdx_records(&self, offset: u64, limit: u64) -> Result<Vec<CdxRecordSpecimen>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cdx_record_specimen ORDER BY id LIMIT ? OFFSET ?",
            RECORD_COLUMNS
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to scan CDX records: {}",
                e
            )))
        })?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_record(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let id = row.try_get::<i64, _>("id").ok();
                    tracing::warn!(record_id = ?id, offset, error = %e, "Skipping undecodable CDX record");
                }
            }
        }

        Ok(records)
    }

    /// Row counts for the record table and both outcome tables
    pub async fn stats(&self) -> Result<StoreStats> {
        let (records, gathered, failed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM cdx_record_specimen),
                (SELECT COUNT(*) FROM memento_specimen),
                (SELECT COUNT(*) FROM memento_failure)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to query store stats: {}",
                e
            )))
        })?;

        Ok(StoreStats {
            records,
            gathered,
            failed,
        })
    }
}

/// Decode a stored unix timestamp
pub(super) fn decode_timestamp(secs: i64) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| sqlx::Error::Decode(format!("timestamp out of range: {}", secs).into()))
}

fn decode_record(row: &SqliteRow) -> std::result::Result<CdxRecordSpecimen, sqlx::Error> {
    Ok(CdxRecordSpecimen {
        id: row.try_get("id")?,
        hash_raw_url: row.try_get("hash_raw_url")?,
        key: row.try_get("key")?,
        timestamp: decode_timestamp(row.try_get("timestamp")?)?,
        url: row.try_get("url")?,
        mime_type: row.try_get("mime_type")?,
        status_code: row.try_get("status_code")?,
        digest: row.try_get("digest")?,
        length: row.try_get("length")?,
        raw_url: row.try_get("raw_url")?,
        view_url: row.try_get("view_url")?,
    })
}
