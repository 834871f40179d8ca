use super::*;
use crate::archive::{FetchError, Memento, MementoFetcher};
use crate::config::WorkerConfig;
use crate::db::{CdxRecordSpecimen, Database};
use crate::error::Error;
use crate::test_helpers::{Scripted, ScriptedFetcher, seeded_store};
use crate::types::{Event, LostReason, Outcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn fast_config(workers: usize) -> WorkerConfig {
    WorkerConfig {
        workers,
        soft_time_limit: Duration::from_secs(2),
        hard_time_limit: Duration::from_secs(5),
        retry_countdown: Duration::from_millis(20),
        max_retries: None,
    }
}

fn start_pool(
    config: &WorkerConfig,
    db: Database,
    fetcher: Arc<dyn MementoFetcher>,
) -> (WorkerPool, Arc<Database>, broadcast::Receiver<Event>) {
    let db = Arc::new(db);
    let (event_tx, event_rx) = broadcast::channel(1000);
    let pool = WorkerPool::start(config, db.clone(), event_tx, |_| Ok(fetcher.clone())).unwrap();
    (pool, db, event_rx)
}

fn items(records: &[CdxRecordSpecimen]) -> Vec<WorkItem> {
    records.iter().map(WorkItem::from).collect()
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn batch_results_cover_every_item() {
    let (db, records, _dir) = seeded_store(&[Some(200), Some(404), Some(200)]).await;
    let fetcher = Arc::new(ScriptedFetcher::new(Scripted::page("<html>ok</html>")));
    let (pool, db, _events) = start_pool(&fast_config(2), db, fetcher);

    let mut handle = pool.submit(items(&records)).await.unwrap();
    assert_eq!(handle.len(), 3);

    let mut results = handle.wait().await.unwrap();
    results.sort_by_key(|r| r.id);

    let tags: Vec<String> = results.iter().map(|r| r.tag()).collect();
    assert_eq!(tags, vec!["gathered", "status code error: 404", "gathered"]);
    assert!(handle.is_ready());
    assert_eq!(db.stats().await.unwrap().gathered, 2);

    pool.shutdown().await;
}

#[tokio::test]
async fn empty_batch_is_immediately_ready() {
    let (db, _records, _dir) = seeded_store(&[]).await;
    let fetcher = Arc::new(ScriptedFetcher::new(Scripted::page("x")));
    let (pool, _db, _events) = start_pool(&fast_config(1), db, fetcher);

    let mut handle = pool.submit(Vec::new()).await.unwrap();
    assert!(handle.is_empty());
    assert!(handle.is_ready());
    assert!(handle.wait().await.unwrap().is_empty());

    pool.shutdown().await;
}

#[tokio::test]
async fn handle_becomes_ready_once_all_items_finish() {
    let (db, records, _dir) = seeded_store(&[Some(200)]).await;
    let fetcher = Arc::new(ScriptedFetcher::new(Scripted::page("x")));
    let (pool, _db, _events) = start_pool(&fast_config(1), db, fetcher);

    let handle = pool.submit(items(&records)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while !handle.is_ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("batch never became ready");

    pool.shutdown().await;
}

#[tokio::test]
async fn connection_reset_is_retried_after_countdown() {
    let (db, records, _dir) = seeded_store(&[Some(200)]).await;
    let id = records[0].id;
    let fetcher = Arc::new(
        ScriptedFetcher::new(Scripted::page("<html>ok</html>"))
            .script(id, vec![Scripted::reset(), Scripted::reset()]),
    );
    let (pool, db, mut events) = start_pool(&fast_config(1), db, fetcher.clone());

    let mut handle = pool.submit(items(&records)).await.unwrap();
    let results = handle.wait().await.unwrap();

    assert_eq!(results, vec![TaskResult::new(id, Outcome::Gathered)]);
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(db.terminal_row_count(id).await.unwrap(), 1);

    let attempts: Vec<u32> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            Event::RetryScheduled { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);

    pool.shutdown().await;
}

#[tokio::test]
async fn retry_cap_leaves_record_unresolved() {
    let (db, records, _dir) = seeded_store(&[Some(200)]).await;
    let id = records[0].id;
    let fetcher = Arc::new(ScriptedFetcher::new(Scripted::reset()));
    let config = WorkerConfig {
        max_retries: Some(2),
        ..fast_config(1)
    };
    let (pool, db, mut events) = start_pool(&config, db, fetcher.clone());

    let mut handle = pool.submit(items(&records)).await.unwrap();
    let results = handle.wait().await.unwrap();

    assert!(results.is_empty(), "no result for an exhausted record");
    assert_eq!(fetcher.calls(), 3, "initial run + 2 retries");
    assert_eq!(db.terminal_row_count(id).await.unwrap(), 0);

    let lost = drain(&mut events).into_iter().any(|event| {
        matches!(
            event,
            Event::RecordLost {
                id: Some(lost_id),
                reason: LostReason::RetriesExhausted(2),
            } if lost_id == id
        )
    });
    assert!(lost, "expected a RecordLost event");

    pool.shutdown().await;
}

#[tokio::test]
async fn hard_time_limit_kills_task_without_result() {
    let (db, records, _dir) = seeded_store(&[Some(200), Some(200)]).await;
    let fetcher = Arc::new(
        ScriptedFetcher::new(Scripted::page("fine")).script(records[0].id, vec![Scripted::Hang]),
    );
    // Soft limit set out of reach so only the hard limit can fire
    let config = WorkerConfig {
        soft_time_limit: Duration::from_secs(60),
        hard_time_limit: Duration::from_millis(100),
        ..fast_config(1)
    };
    let (pool, db, mut events) = start_pool(&config, db, fetcher);

    let mut handle = pool.submit(items(&records)).await.unwrap();
    let results = handle.wait().await.unwrap();

    assert_eq!(
        results,
        vec![TaskResult::new(records[1].id, Outcome::Gathered)],
        "the worker moves on to the next item"
    );
    assert_eq!(db.terminal_row_count(records[0].id).await.unwrap(), 0);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        Event::RecordLost {
            reason: LostReason::HardTimeLimit,
            ..
        }
    )));

    pool.shutdown().await;
}

struct PanickingFetcher;

#[async_trait::async_trait]
impl MementoFetcher for PanickingFetcher {
    async fn fetch_memento(
        &self,
        _record: &CdxRecordSpecimen,
    ) -> std::result::Result<Memento, FetchError> {
        panic!("archive client bug");
    }
}

#[tokio::test]
async fn panicking_task_does_not_take_down_the_worker() {
    let (db, records, _dir) = seeded_store(&[Some(200), Some(404)]).await;
    let (pool, _db, _events) = start_pool(&fast_config(1), db, Arc::new(PanickingFetcher));

    let mut handle = pool.submit(items(&records)).await.unwrap();
    let results = handle.wait().await.unwrap();

    assert_eq!(
        results,
        vec![TaskResult::new(records[1].id, Outcome::StatusCodeError(404))]
    );

    pool.shutdown().await;
}

#[tokio::test]
async fn submit_after_shutdown_is_rejected() {
    let (db, records, _dir) = seeded_store(&[Some(200)]).await;
    let fetcher = Arc::new(ScriptedFetcher::new(Scripted::page("x")));
    let (pool, _db, _events) = start_pool(&fast_config(1), db, fetcher);

    pool.shutdown().await;

    let result = pool.submit(items(&records)).await;
    assert!(matches!(result, Err(Error::ShuttingDown)));
}

#[tokio::test]
async fn shutdown_abandons_pending_retries() {
    let (db, records, _dir) = seeded_store(&[Some(200)]).await;
    let fetcher = Arc::new(ScriptedFetcher::new(Scripted::reset()));
    let config = WorkerConfig {
        retry_countdown: Duration::from_secs(60),
        ..fast_config(1)
    };
    let (pool, _db, mut events) = start_pool(&config, db, fetcher);

    let mut handle = pool.submit(items(&records)).await.unwrap();

    // Wait until the first attempt has scheduled its retry
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(Event::RetryScheduled { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await
    .unwrap();

    pool.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("wait must not hang after shutdown");
    assert!(matches!(result, Err(Error::Substrate(_))), "got {result:?}");
}
