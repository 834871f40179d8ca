//! Batch Dispatcher: turns the backlog into a bounded pipeline of batches.
//!
//! The dispatcher scans `cdx_record_specimen` in id order, one chunk at a time.
//! For each chunk it drops records that need no work (error status, already
//! gathered, already failed), submits the rest as one batch, and then collects
//! at most one older batch according to the [`BatchWindow`] policy. When the
//! backlog is exhausted every remaining batch is collected in submission order.
//!
//! Nothing that goes wrong inside a chunk or a batch aborts the run: it is
//! logged, counted in the [`DispatchSummary`], and the loop moves on. Records
//! left unresolved stay eligible for the next pass.

use crate::config::DispatchConfig;
use crate::db::{Database, OutcomeTable};
use crate::error::Result;
use crate::substrate::ExecutionSubstrate;
use crate::types::{Event, SkipReason};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

mod selection;
mod window;

pub use selection::{Selection, select_for_dispatch};
pub use window::{BatchWindow, PendingBatch};

/// Counters of one dispatcher run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Total records in the store when the run started
    pub total_records: u64,
    /// Chunks scanned
    pub chunks: u64,
    /// Rows decoded across all chunks
    pub rows_scanned: u64,
    /// Records skipped for a stored status code ≥ 400
    pub excluded: u64,
    /// Records skipped because a MementoSpecimen already existed
    pub already_gathered: u64,
    /// Records skipped because a MementoFailure already existed
    pub already_failed: u64,
    /// Work items submitted
    pub dispatched: u64,
    /// Batches submitted
    pub batches: u64,
    /// Collected results, keyed by outcome kind
    pub results: BTreeMap<String, u64>,
    /// Chunks skipped because scanning, deduplicating or submitting failed
    pub chunk_errors: u64,
    /// Batches whose collection failed
    pub collection_errors: u64,
    /// Largest number of batches outstanding at once
    pub max_outstanding: usize,
    /// The run stopped early on a cancellation request
    pub cancelled: bool,
}

impl DispatchSummary {
    /// Number of collected results across all outcome kinds
    pub fn collected(&self) -> u64 {
        self.results.values().sum()
    }
}

/// Producer loop feeding the execution substrate
pub struct Dispatcher {
    db: Arc<Database>,
    substrate: Arc<dyn ExecutionSubstrate>,
    config: DispatchConfig,
    event_tx: broadcast::Sender<Event>,
}

impl Dispatcher {
    /// Create a dispatcher over a store and a substrate
    pub fn new(
        db: Arc<Database>,
        substrate: Arc<dyn ExecutionSubstrate>,
        config: DispatchConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            db,
            substrate,
            config,
            event_tx,
        }
    }

    /// Scan the backlog from `config.start_offset` and dispatch it
    ///
    /// Cancelling `cancel` stops the scan before the next chunk; batches
    /// already submitted are still collected.
    ///
    /// # Errors
    /// Only fails if the backlog size cannot be read.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<DispatchSummary> {
        let chunk_size = self.config.chunk_size.max(1);
        let total = self.db.count_cdx_records().await?;
        tracing::info!(
            total_records = total,
            start_offset = self.config.start_offset,
            chunk_size,
            "Starting dispatch"
        );

        let mut summary = DispatchSummary {
            total_records: total,
            ..DispatchSummary::default()
        };
        let mut window = BatchWindow::new(self.config.max_outstanding_batches);
        let mut offset = self.config.start_offset;

        while offset < total {
            if cancel.is_cancelled() {
                tracing::info!(offset, "Dispatch cancelled, draining outstanding batches");
                summary.cancelled = true;
                break;
            }

            self.dispatch_chunk(offset, chunk_size, &mut window, &mut summary)
                .await;

            if let Some(batch) = window.next_due() {
                self.collect(batch, &mut summary).await;
            }

            tracing::debug!(
                offset,
                total_records = total,
                outstanding = window.len(),
                "Chunk done"
            );
            offset = offset.saturating_add(chunk_size);
        }

        while let Some(batch) = window.pop_oldest() {
            self.collect(batch, &mut summary).await;
        }

        summary.max_outstanding = window.high_water();
        tracing::info!(
            dispatched = summary.dispatched,
            collected = summary.collected(),
            excluded = summary.excluded,
            already_gathered = summary.already_gathered,
            already_failed = summary.already_failed,
            collection_errors = summary.collection_errors,
            "Dispatch finished"
        );

        Ok(summary)
    }

    async fn dispatch_chunk(
        &self,
        offset: u64,
        chunk_size: u64,
        window: &mut BatchWindow,
        summary: &mut DispatchSummary,
    ) {
        summary.chunks += 1;

        let records = match self.db.scan_cdx_records(offset, chunk_size).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(offset, error = %e, "Failed to scan chunk, skipping");
                summary.chunk_errors += 1;
                return;
            }
        };

        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        let resolved = async {
            let gathered = self.db.existing_ids(OutcomeTable::Gathered, &ids).await?;
            let failed = self.db.existing_ids(OutcomeTable::Failed, &ids).await?;
            Ok::<_, crate::Error>((gathered, failed))
        }
        .await;
        let (gathered, failed) = match resolved {
            Ok(sets) => sets,
            Err(e) => {
                tracing::error!(offset, error = %e, "Failed to query resolved records, skipping chunk");
                summary.chunk_errors += 1;
                return;
            }
        };

        tracing::info!(
            offset,
            rows = records.len(),
            already_gathered = gathered.len(),
            already_failed = failed.len(),
            "Scanned chunk"
        );
        self.emit(Event::ChunkScanned {
            offset,
            rows: records.len(),
            already_gathered: gathered.len(),
            already_failed: failed.len(),
        });
        summary.rows_scanned += records.len() as u64;

        let selection = select_for_dispatch(&records, &gathered, &failed);

        for (id, reason) in &selection.skipped {
            match reason {
                SkipReason::ErrorStatus => {
                    summary.excluded += 1;
                    tracing::warn!(record_id = %id, "Record has an error status code, skipping");
                }
                SkipReason::AlreadyGathered => {
                    summary.already_gathered += 1;
                    tracing::info!(record_id = %id, "Record already gathered");
                }
                SkipReason::AlreadyFailed => {
                    summary.already_failed += 1;
                    tracing::info!(record_id = %id, "Record previously failed");
                }
            }
            self.emit(Event::RecordSkipped {
                id: *id,
                reason: *reason,
            });
        }

        if selection.items.is_empty() {
            tracing::debug!(offset, "Nothing to dispatch in chunk");
            return;
        }

        let items = selection.items.len();
        tracing::debug!(offset, items, "Submitting batch");
        match self.substrate.submit(selection.items).await {
            Ok(handle) => {
                window.push(PendingBatch { offset, handle });
                summary.dispatched += items as u64;
                summary.batches += 1;
                self.emit(Event::BatchSubmitted {
                    offset,
                    items,
                    outstanding: window.len(),
                });
            }
            Err(e) => {
                tracing::error!(offset, items, error = %e, "Failed to submit batch, skipping chunk");
                summary.chunk_errors += 1;
            }
        }
    }

    async fn collect(&self, mut batch: PendingBatch, summary: &mut DispatchSummary) {
        match batch.handle.wait().await {
            Ok(results) => {
                for result in &results {
                    tracing::info!(record_id = %result.id, outcome = %result.outcome, "Processed record");
                    *summary
                        .results
                        .entry(result.outcome.kind().to_string())
                        .or_default() += 1;
                }
                self.emit(Event::BatchCollected {
                    offset: batch.offset,
                    results: results.len(),
                });
            }
            Err(e) => {
                tracing::error!(offset = batch.offset, error = %e, "Error collecting batch");
                summary.collection_errors += 1;
                self.emit(Event::BatchCollectionFailed {
                    offset: batch.offset,
                    error: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}
