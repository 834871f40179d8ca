//! Shared test helpers: a scripted archive and a seeded Record Store.

use crate::archive::{FetchError, Memento, MementoFetcher};
use crate::db::{CdxRecordSpecimen, Database, NewCdxRecord};
use crate::types::RecordId;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// One scripted answer of the fake archive
#[derive(Clone, Debug)]
pub(crate) enum Scripted {
    /// Return this memento
    Memento(Memento),
    /// Fail with this error
    Error(FetchError),
    /// Never answer within any sane time limit
    Hang,
}

impl Scripted {
    pub(crate) fn page(body: &str) -> Self {
        Scripted::Memento(Memento::new(200, body.as_bytes().to_vec()))
    }

    pub(crate) fn status(code: u16) -> Self {
        Scripted::Memento(Memento::new(code, Vec::new()))
    }

    pub(crate) fn reset() -> Self {
        Scripted::Error(FetchError::ConnectionReset("connection reset by peer".into()))
    }
}

/// Fake archive answering from per-record scripts, then from a default
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<RecordId, VecDeque<Scripted>>>,
    default: Scripted,
    calls: AtomicU32,
}

impl ScriptedFetcher {
    pub(crate) fn new(default: Scripted) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default,
            calls: AtomicU32::new(0),
        }
    }

    /// Queue answers for one record; once drained the default applies
    pub(crate) fn script(self, id: RecordId, answers: Vec<Scripted>) -> Self {
        self.scripts.lock().unwrap().insert(id, answers.into());
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MementoFetcher for ScriptedFetcher {
    async fn fetch_memento(&self, record: &CdxRecordSpecimen) -> Result<Memento, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let answer = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&record.id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| self.default.clone());

        match answer {
            Scripted::Memento(memento) => Ok(memento),
            Scripted::Error(e) => Err(e),
            Scripted::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchError::Other("hang elapsed".into()))
            }
        }
    }
}

/// Build a record whose raw URL is unique per `n`
pub(crate) fn new_record(n: u32, status_code: Option<i64>) -> NewCdxRecord {
    let original = format!("http://example.com/page/{}", n);
    NewCdxRecord {
        key: format!("com,example)/page/{}", n),
        timestamp: Utc.with_ymd_and_hms(2019, 3, 4, 5, 6, 7).unwrap(),
        url: original.clone(),
        mime_type: "text/html".to_string(),
        status_code,
        digest: format!("DIGEST{:026}", n),
        length: Some(1000),
        raw_url: format!("https://web.archive.org/web/20190304050607id_/{}", original),
        view_url: format!("https://web.archive.org/web/20190304050607/{}", original),
    }
}

/// Create a store in a temp dir and insert one record per status code
///
/// Returns the store, the stored records in id order, and the tempdir (which
/// must be kept alive).
pub(crate) async fn seeded_store(
    statuses: &[Option<i64>],
) -> (Database, Vec<CdxRecordSpecimen>, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db"))
        .await
        .unwrap();

    let mut records = Vec::with_capacity(statuses.len());
    for (n, status) in statuses.iter().enumerate() {
        let id = db
            .insert_cdx_record(&new_record(n as u32, *status))
            .await
            .unwrap()
            .unwrap();
        records.push(db.get_cdx_record(id).await.unwrap().unwrap());
    }

    (db, records, temp_dir)
}
