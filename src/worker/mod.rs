//! Outcome Classifier: the task a worker runs for one CDX record.
//!
//! A task turns one record into at most one terminal row and an outcome tag:
//!
//! | fetch result                     | row written       | tag                              |
//! |----------------------------------|-------------------|----------------------------------|
//! | stored status ≥ 400 (no fetch)   | none              | `status code error: N`           |
//! | memento, ok                      | MementoSpecimen   | `gathered`                       |
//! | memento, not ok                  | MementoFailure    | `memento error: N`               |
//! | soft time limit                  | MementoFailure    | `soft time limit exceeded: ...`  |
//! | playback error                   | MementoFailure    | `memento playback error: ...`    |
//! | connection reset                 | none              | task is re-run later             |
//! | anything else                    | none              | `exception: ...`                 |
//!
//! A failed commit writes nothing and reports `error while committing`.

use crate::archive::{FetchError, MementoFetcher};
use crate::db::{CdxRecordSpecimen, Database, MementoSpecimen, TerminalRow};
use crate::types::{Event, Outcome, RecordId, TaskResult, is_error_status};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Resources owned by one worker and reused across every task it runs
pub struct WorkerContext {
    /// Archive client of this worker
    pub fetcher: Arc<dyn MementoFetcher>,
    /// Record Store, shared by all workers
    pub db: Arc<Database>,
    /// Bound on the remote fetch
    pub soft_time_limit: Duration,
    /// Event channel for progress reporting
    pub event_tx: broadcast::Sender<Event>,
}

/// How a task invocation ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task produced a result for the dispatcher
    Completed(TaskResult),
    /// The connection was reset; run the same record again after a delay
    Retry {
        /// Record to re-run
        id: RecordId,
        /// Error that triggered the retry
        reason: String,
    },
}

/// Classify one record and persist its terminal row, if any
pub async fn process_cdx_record(ctx: &WorkerContext, record: CdxRecordSpecimen) -> TaskOutcome {
    let id = record.id;

    if is_error_status(record.status_code) {
        let code = record.status_code.unwrap_or_default();
        tracing::warn!(record_id = %id, status_code = code, "Record has an error status code, not gathering");
        return complete(ctx, TaskResult::new(id, Outcome::StatusCodeError(code)));
    }

    let fetched = match tokio::time::timeout(
        ctx.soft_time_limit,
        ctx.fetcher.fetch_memento(&record),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(FetchError::SoftTimeLimit(format!(
            "fetch did not finish within {:?}",
            ctx.soft_time_limit
        ))),
    };

    let (outcome, staged) = match fetched {
        Ok(memento) if memento.ok => {
            tracing::debug!(
                record_id = %id,
                bytes = memento.content.len(),
                content_type = memento.mime_type.as_deref().unwrap_or("unknown"),
                "Fetched memento"
            );
            let specimen = MementoSpecimen::from_record(&record, memento.content);
            (Outcome::Gathered, Some(TerminalRow::Memento(specimen)))
        }
        Ok(memento) => {
            tracing::info!(record_id = %id, status_code = memento.status_code, "Archive replayed an error status");
            (
                Outcome::MementoError(memento.status_code),
                Some(TerminalRow::Failure(id)),
            )
        }
        Err(FetchError::SoftTimeLimit(detail)) => {
            tracing::warn!(record_id = %id, detail = %detail, "Soft time limit exceeded");
            (
                Outcome::SoftTimeLimitExceeded(detail),
                Some(TerminalRow::Failure(id)),
            )
        }
        Err(FetchError::Playback(detail)) => {
            tracing::debug!(record_id = %id, detail = %detail, "Memento playback error");
            (Outcome::PlaybackError(detail), Some(TerminalRow::Failure(id)))
        }
        Err(FetchError::ConnectionReset(reason)) => {
            tracing::info!(record_id = %id, reason = %reason, "Connection reset, task will be retried");
            return TaskOutcome::Retry { id, reason };
        }
        Err(other) => {
            tracing::warn!(record_id = %id, error = %other, "Unclassified fetch failure");
            (Outcome::Exception(other.to_string()), None)
        }
    };

    if let Some(row) = staged
        && let Err(e) = ctx.db.persist_terminal_row(&row).await
    {
        tracing::error!(record_id = %id, error = %e, "Failed to commit terminal row");
        return complete(ctx, TaskResult::new(id, Outcome::CommitFailed));
    }

    complete(ctx, TaskResult::new(id, outcome))
}

fn complete(ctx: &WorkerContext, result: TaskResult) -> TaskOutcome {
    ctx.event_tx
        .send(Event::RecordProcessed {
            id: result.id,
            tag: result.tag(),
        })
        .ok();
    TaskOutcome::Completed(result)
}
