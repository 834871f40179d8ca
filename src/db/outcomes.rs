//! Dedup queries and single-record terminal writes.

use std::collections::HashSet;

use sqlx::{QueryBuilder, Row, Sqlite};

use crate::error::DatabaseError;
use crate::types::RecordId;
use crate::{Error, Result};

use super::records::decode_timestamp;
use super::{Database, MementoSpecimen, OutcomeTable, TerminalRow};

/// Ids bound per dedup query, below SQLite's host parameter limit
const MAX_IDS_PER_QUERY: usize = 10_000;

impl Database {
    /// Return the subset of `ids` that already have a row in `table`
    ///
    /// Large id sets are split across several queries.
    pub async fn existing_ids(
        &self,
        table: OutcomeTable,
        ids: &[RecordId],
    ) -> Result<HashSet<RecordId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut found = HashSet::new();
        for group in ids.chunks(MAX_IDS_PER_QUERY) {
            let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("SELECT id FROM ");
            builder.push(table.table_name());
            builder.push(" WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in group {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows: Vec<RecordId> = builder
                .build_query_scalar::<RecordId>()
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query existing ids in {}: {}",
                        table.table_name(),
                        e
                    )))
                })?;
            found.extend(rows);
        }

        Ok(found)
    }

    /// Write one terminal row inside a transaction scoped to this call
    ///
    /// The connection is taken from the pool for the duration of the
    /// transaction and returned when it ends, committed or not. A second
    /// terminal row for the same id is rejected with
    /// [`DatabaseError::ConstraintViolation`] and nothing is written.
    pub async fn persist_terminal_row(&self, row: &TerminalRow) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        match row {
            TerminalRow::Memento(memento) => {
                sqlx::query(
                    r#"
                    INSERT INTO memento_specimen (
                        id, hash_raw_url, raw_url, url, mime_type,
                        status_code, time, view_url, html_content
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(memento.id)
                .bind(&memento.hash_raw_url)
                .bind(&memento.raw_url)
                .bind(&memento.url)
                .bind(&memento.mime_type)
                .bind(memento.status_code)
                .bind(memento.time.timestamp())
                .bind(&memento.view_url)
                .bind(&memento.html_content)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::from_write("Failed to insert memento", e))
                })?;
            }
            TerminalRow::Failure(id) => {
                sqlx::query("INSERT INTO memento_failure (id) VALUES (?)")
                    .bind(*id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::from_write(
                            "Failed to insert memento failure",
                            e,
                        ))
                    })?;
            }
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::from_write("Failed to commit terminal row", e))
        })?;

        Ok(())
    }

    /// Get a gathered memento by id
    pub async fn get_memento(&self, id: RecordId) -> Result<Option<MementoSpecimen>> {
        let row = sqlx::query(
            r#"
            SELECT
                id, hash_raw_url, raw_url, url, mime_type,
                status_code, time, view_url, html_content
            FROM memento_specimen
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get memento: {}",
                e
            )))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let decode = || -> std::result::Result<MementoSpecimen, sqlx::Error> {
            Ok(MementoSpecimen {
                id: row.try_get("id")?,
                hash_raw_url: row.try_get("hash_raw_url")?,
                raw_url: row.try_get("raw_url")?,
                url: row.try_get("url")?,
                mime_type: row.try_get("mime_type")?,
                status_code: row.try_get("status_code")?,
                time: decode_timestamp(row.try_get("time")?)?,
                view_url: row.try_get("view_url")?,
                html_content: row.try_get("html_content")?,
            })
        };

        decode().map(Some).map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to decode memento {}: {}",
                id, e
            )))
        })
    }

    /// Returns true if the record has a permanent-failure marker
    pub async fn is_failed(&self, id: RecordId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM memento_failure WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query memento failure: {}",
                    e
                )))
            })?;

        Ok(found.is_some())
    }

    /// Number of terminal rows for a record across both outcome tables
    pub async fn terminal_row_count(&self, id: RecordId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT
                (SELECT COUNT(*) FROM memento_specimen WHERE id = ?1)
                + (SELECT COUNT(*) FROM memento_failure WHERE id = ?1)
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count terminal rows: {}",
                e
            )))
        })?;

        Ok(count)
    }
}
