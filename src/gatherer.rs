//! Top-level wiring of store, worker pool and dispatcher.

use crate::archive::{MementoFetcher, WaybackClient};
use crate::config::Config;
use crate::db::Database;
use crate::dispatcher::{DispatchSummary, Dispatcher};
use crate::error::Result;
use crate::substrate::WorkerPool;
use crate::types::Event;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// A configured gathering pipeline
///
/// Owns the Record Store, a running [`WorkerPool`] and the event channel.
/// [`run`](Self::run) performs one dispatcher pass over the backlog; call
/// [`shutdown`](Self::shutdown) when done to stop the workers.
pub struct Gatherer {
    config: Config,
    db: Arc<Database>,
    pool: Arc<WorkerPool>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Gatherer {
    /// Open the store and start one Wayback client per worker
    ///
    /// # Errors
    /// Fails on invalid configuration, if the database cannot be opened, or if
    /// an HTTP client cannot be built.
    pub async fn new(config: Config) -> Result<Self> {
        let archive = config.archive.clone();
        Self::with_fetchers(config, move |_| {
            let client: Arc<dyn MementoFetcher> = Arc::new(WaybackClient::new(&archive)?);
            Ok(client)
        })
        .await
    }

    /// Open the store and start workers with caller-supplied archive clients
    ///
    /// `make_fetcher` is called once per worker index.
    pub async fn with_fetchers<F>(config: Config, make_fetcher: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<Arc<dyn MementoFetcher>>,
    {
        config.validate()?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let pool = Arc::new(WorkerPool::start(
            &config.worker,
            db.clone(),
            event_tx.clone(),
            make_fetcher,
        )?);

        Ok(Self {
            config,
            db,
            pool,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The Record Store
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Token that stops the dispatcher between chunks when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one dispatcher pass over the backlog
    pub async fn run(&self) -> Result<DispatchSummary> {
        let dispatcher = Dispatcher::new(
            self.db.clone(),
            self.pool.clone(),
            self.config.dispatch.clone(),
            self.event_tx.clone(),
        );
        dispatcher.run(&self.cancel).await
    }

    /// Stop dispatching and wait for the workers to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.pool.shutdown().await;
    }
}
