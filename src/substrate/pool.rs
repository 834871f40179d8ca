//! In-process worker pool with soft/hard time limits and delayed retry.

use super::{BatchHandle, ExecutionSubstrate};
use crate::archive::MementoFetcher;
use crate::config::WorkerConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{Event, LostReason, RecordId, TaskResult, WorkItem};
use crate::worker::{TaskOutcome, WorkerContext, process_cdx_record};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a finished item reports back to its batch
#[derive(Debug)]
enum ItemReport {
    Finished(TaskResult),
    Lost(LostReason),
}

/// Report channel of one submitted item
///
/// Dropping a slot that never reported still counts the item as done, so a
/// batch never stays "not ready" forever; the batch's `wait` then fails.
struct ItemSlot {
    tx: Option<oneshot::Sender<ItemReport>>,
    pending: Arc<AtomicUsize>,
}

impl ItemSlot {
    fn report(mut self, report: ItemReport) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(report);
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ItemSlot {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// A queued task invocation
struct Job {
    /// JSON-encoded [`WorkItem`]
    payload: String,
    /// Number of connection-reset retries already taken
    attempt: u32,
    slot: ItemSlot,
}

#[derive(Clone, Copy, Debug)]
struct PoolSettings {
    hard_time_limit: Duration,
    retry_countdown: Duration,
    max_retries: Option<u32>,
}

/// Fixed set of workers pulling jobs from a shared queue
///
/// Each worker owns a [`WorkerContext`] (its own archive client) for its whole
/// lifetime. Jobs carry the work item as JSON, so the same contract holds as
/// for an out-of-process substrate.
pub struct WorkerPool {
    job_tx: mpsc::UnboundedSender<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Start `config.workers` workers
    ///
    /// `make_fetcher` is called once per worker index to build that worker's
    /// archive client. Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns the first error raised by `make_fetcher`
    pub fn start<F>(
        config: &WorkerConfig,
        db: Arc<Database>,
        event_tx: broadcast::Sender<Event>,
        mut make_fetcher: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> Result<Arc<dyn MementoFetcher>>,
    {
        let settings = PoolSettings {
            hard_time_limit: config.hard_time_limit,
            retry_countdown: config.retry_countdown,
            max_retries: config.max_retries,
        };

        let mut contexts = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            contexts.push(Arc::new(WorkerContext {
                fetcher: make_fetcher(index)?,
                db: db.clone(),
                soft_time_limit: config.soft_time_limit,
                event_tx: event_tx.clone(),
            }));
        }

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let cancel = CancellationToken::new();

        let workers = contexts
            .into_iter()
            .enumerate()
            .map(|(index, ctx)| {
                let jobs = job_rx.clone();
                let requeue = job_tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(index, ctx, jobs, requeue, settings, cancel).await;
                })
            })
            .collect();

        tracing::info!(workers = config.workers, "Worker pool started");

        Ok(Self {
            job_tx,
            workers: Mutex::new(workers),
            cancel,
        })
    }

    /// Stop accepting batches and wait for the workers to exit
    ///
    /// Tasks already running finish (bounded by the hard time limit); queued
    /// jobs and pending retries are abandoned.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task failed during shutdown");
            }
        }

        tracing::info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait::async_trait]
impl ExecutionSubstrate for WorkerPool {
    async fn submit(&self, batch: Vec<WorkItem>) -> Result<Box<dyn BatchHandle>> {
        if self.cancel.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let payloads = batch
            .iter()
            .map(|item| item.to_json().map(|payload| (item.id, payload)))
            .collect::<serde_json::Result<Vec<_>>>()?;

        let pending = Arc::new(AtomicUsize::new(payloads.len()));
        let mut receivers = Vec::with_capacity(payloads.len());

        for (id, payload) in payloads {
            let (tx, rx) = oneshot::channel();
            let job = Job {
                payload,
                attempt: 0,
                slot: ItemSlot {
                    tx: Some(tx),
                    pending: pending.clone(),
                },
            };
            // A closed queue drops the job, which the batch reports on wait
            let _ = self.job_tx.send(job);
            receivers.push((id, rx));
        }

        Ok(Box::new(PoolBatchHandle {
            len: receivers.len(),
            receivers,
            pending,
        }))
    }
}

struct PoolBatchHandle {
    len: usize,
    receivers: Vec<(RecordId, oneshot::Receiver<ItemReport>)>,
    pending: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl BatchHandle for PoolBatchHandle {
    fn len(&self) -> usize {
        self.len
    }

    fn is_ready(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }

    async fn wait(&mut self) -> Result<Vec<TaskResult>> {
        let (ids, receivers): (Vec<_>, Vec<_>) = self.receivers.drain(..).unzip();
        let reports = join_all(receivers).await;

        let mut results = Vec::with_capacity(reports.len());
        let mut abandoned = 0usize;

        for (id, report) in ids.into_iter().zip(reports) {
            match report {
                Ok(ItemReport::Finished(result)) => results.push(result),
                Ok(ItemReport::Lost(reason)) => {
                    tracing::debug!(record_id = %id, reason = %reason, "Item produced no result");
                }
                Err(_) => abandoned += 1,
            }
        }

        if abandoned > 0 {
            return Err(Error::Substrate(format!(
                "{} of {} items were abandoned before reporting",
                abandoned, self.len
            )));
        }

        Ok(results)
    }
}

async fn run_worker(
    index: usize,
    ctx: Arc<WorkerContext>,
    jobs: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    requeue: mpsc::UnboundedSender<Job>,
    settings: PoolSettings,
    cancel: CancellationToken,
) {
    tracing::debug!(worker = index, "Worker started");

    loop {
        let job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            }
        };

        run_job(&ctx, job, &requeue, settings, &cancel).await;
    }

    tracing::debug!(worker = index, "Worker stopped");
}

async fn run_job(
    ctx: &Arc<WorkerContext>,
    job: Job,
    requeue: &mpsc::UnboundedSender<Job>,
    settings: PoolSettings,
    cancel: &CancellationToken,
) {
    let item = match WorkItem::from_json(&job.payload) {
        Ok(item) => item,
        Err(e) => {
            report_lost(ctx, job.slot, None, LostReason::Undecodable(e.to_string()));
            return;
        }
    };
    let id = item.id;

    let task_ctx = ctx.clone();
    let task = tokio::spawn(async move { process_cdx_record(&task_ctx, item.into()).await });
    let abort = task.abort_handle();

    let outcome = match tokio::time::timeout(settings.hard_time_limit, task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            report_lost(ctx, job.slot, Some(id), LostReason::Panicked(e.to_string()));
            return;
        }
        Err(_) => {
            abort.abort();
            report_lost(ctx, job.slot, Some(id), LostReason::HardTimeLimit);
            return;
        }
    };

    match outcome {
        TaskOutcome::Completed(result) => job.slot.report(ItemReport::Finished(result)),
        TaskOutcome::Retry { id, reason } => {
            let attempt = job.attempt + 1;
            if let Some(max) = settings.max_retries
                && attempt > max
            {
                report_lost(ctx, job.slot, Some(id), LostReason::RetriesExhausted(max));
                return;
            }

            tracing::info!(
                record_id = %id,
                attempt,
                countdown_ms = settings.retry_countdown.as_millis(),
                reason = %reason,
                "Scheduling retry"
            );
            ctx.event_tx
                .send(Event::RetryScheduled {
                    id,
                    attempt,
                    countdown: settings.retry_countdown,
                })
                .ok();

            let retry = Job {
                payload: job.payload,
                attempt,
                slot: job.slot,
            };
            let requeue = requeue.clone();
            let cancel = cancel.clone();
            let countdown = settings.retry_countdown;
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(countdown) => {
                        let _ = requeue.send(retry);
                    }
                }
            });
        }
    }
}

fn report_lost(ctx: &WorkerContext, slot: ItemSlot, id: Option<RecordId>, reason: LostReason) {
    tracing::warn!(record_id = ?id.map(|id| id.get()), reason = %reason, "Task ended without a result");
    ctx.event_tx
        .send(Event::RecordLost {
            id,
            reason: reason.clone(),
        })
        .ok();
    slot.report(ItemReport::Lost(reason));
}
