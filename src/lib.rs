//! # memento-gather
//!
//! Gathers archived copies of web pages (mementos) for the CDX records
//! discovered by an earlier crawl stage.
//!
//! ## Pipeline
//!
//! - The **Record Store** ([`db`]) holds discovered CDX records and, per
//!   record, at most one terminal outcome: a stored memento or a failure.
//! - The **Batch Dispatcher** ([`dispatcher`]) scans the backlog in id order,
//!   skips records that need no work, and submits the rest in batches while
//!   keeping the number of outstanding batches bounded.
//! - The **Execution Substrate** ([`substrate`]) runs one task per record on a
//!   pool of workers with soft/hard time limits and delayed retries.
//! - The **Outcome Classifier** ([`worker`]) fetches the memento, classifies
//!   what happened and persists the terminal row.
//!
//! ## Quick Start
//!
//! ```no_run
//! use memento_gather::{Config, Gatherer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gatherer = Gatherer::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = gatherer.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = gatherer.run().await?;
//!     println!("dispatched {} records", summary.dispatched);
//!
//!     gatherer.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Archive playback clients
pub mod archive;
/// Configuration types
pub mod config;
/// Database persistence layer (Record Store)
pub mod db;
/// Batch Dispatcher with bounded outstanding batches
pub mod dispatcher;
/// Error types
pub mod error;
/// Pipeline wiring
pub mod gatherer;
/// Request rate limiting with token bucket
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Execution substrate abstraction and the in-process worker pool
pub mod substrate;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Outcome Classifier task
pub mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use archive::{FetchError, Memento, MementoFetcher, WaybackClient};
pub use config::{ArchiveConfig, Config, DispatchConfig, RetryConfig, WorkerConfig};
pub use db::{CdxRecordSpecimen, Database, MementoSpecimen, NewCdxRecord, StoreStats};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::{DatabaseError, Error, Result};
pub use gatherer::Gatherer;
pub use substrate::{BatchHandle, ExecutionSubstrate, WorkerPool};
pub use types::{Event, LostReason, Outcome, RecordId, SkipReason, TaskResult, WorkItem};

/// Run one gathering pass with graceful signal handling.
///
/// A termination signal stops the dispatcher before its next chunk; batches
/// already submitted are still collected. The worker pool is shut down once
/// the pass ends either way.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use memento_gather::{Config, Gatherer, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let gatherer = Gatherer::new(Config::default()).await?;
///
///     // Run with automatic signal handling
///     let summary = run_with_shutdown(&gatherer).await?;
///     println!("{:?}", summary);
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(gatherer: &Gatherer) -> Result<DispatchSummary> {
    let cancel = gatherer.cancel_token();
    let signal_task = tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Stopping after the current chunk");
        cancel.cancel();
    });

    let summary = gatherer.run().await;

    signal_task.abort();
    gatherer.shutdown().await;
    summary
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
