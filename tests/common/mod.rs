//! Common test utilities for memento-gather integration tests

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use memento_gather::{
    CdxRecordSpecimen, Config, Database, Event, FetchError, Memento, MementoFetcher, NewCdxRecord,
    RecordId,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// One answer of the fake archive
#[derive(Clone, Debug)]
pub enum Answer {
    Page(&'static str),
    Status(u16),
    Fail(FetchError),
}

impl Answer {
    pub fn reset() -> Self {
        Answer::Fail(FetchError::ConnectionReset("connection reset by peer".into()))
    }
}

/// In-memory archive answering per raw URL, then with `Page("<html>ok</html>")`
#[derive(Default)]
pub struct FakeArchive {
    answers: Mutex<HashMap<String, VecDeque<Answer>>>,
    calls: AtomicU32,
}

impl FakeArchive {
    pub fn answer(&self, raw_url: &str, answers: Vec<Answer>) {
        self.answers
            .lock()
            .unwrap()
            .insert(raw_url.to_string(), answers.into());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MementoFetcher for FakeArchive {
    async fn fetch_memento(&self, record: &CdxRecordSpecimen) -> Result<Memento, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .answers
            .lock()
            .unwrap()
            .get_mut(&record.raw_url)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Answer::Page("<html>ok</html>"));

        match answer {
            Answer::Page(body) => Ok(Memento::new(200, body.as_bytes().to_vec())),
            Answer::Status(code) => Ok(Memento::new(code, Vec::new())),
            Answer::Fail(e) => Err(e),
        }
    }
}

/// Discovery-shaped record whose raw URL is unique per `n`
pub fn cdx_record(n: u32, status_code: Option<i64>) -> NewCdxRecord {
    let original = format!("http://example.org/article/{}", n);
    NewCdxRecord {
        key: format!("org,example)/article/{}", n),
        timestamp: Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap(),
        url: original.clone(),
        mime_type: "text/html".to_string(),
        status_code,
        digest: format!("SHA1{:028}", n),
        length: Some(2048),
        raw_url: format!("https://web.archive.org/web/20200102030405id_/{}", original),
        view_url: format!("https://web.archive.org/web/20200102030405/{}", original),
    }
}

/// Configuration with fast retries and a database inside `dir`
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.path().join("gather.db");
    config.dispatch.chunk_size = 3;
    config.dispatch.max_outstanding_batches = 1;
    config.worker.workers = 2;
    config.worker.soft_time_limit = Duration::from_secs(2);
    config.worker.hard_time_limit = Duration::from_secs(5);
    config.worker.retry_countdown = Duration::from_millis(20);
    config.archive.retry.max_attempts = 0;
    config
}

/// Insert records and return their stored form in id order
pub async fn seed(db: &Database, records: &[NewCdxRecord]) -> Vec<CdxRecordSpecimen> {
    let mut stored = Vec::with_capacity(records.len());
    for record in records {
        let id = db.insert_cdx_record(record).await.unwrap().unwrap();
        stored.push(db.get_cdx_record(id).await.unwrap().unwrap());
    }
    stored
}

/// Drain every event currently buffered on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Number of retries scheduled for `id`
pub fn retries_for(events: &[Event], id: RecordId) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, Event::RetryScheduled { id: retry_id, .. } if *retry_id == id))
        .count()
}
