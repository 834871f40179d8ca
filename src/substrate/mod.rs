//! Execution Substrate: where work items run.
//!
//! The dispatcher only sees two traits. [`ExecutionSubstrate::submit`] accepts a
//! batch of [`WorkItem`]s and returns a [`BatchHandle`] that can be polled for
//! readiness and awaited for its per-item results. Any worker may run any item;
//! workers keep their own resources across tasks.
//!
//! [`WorkerPool`] is the in-process implementation used by the binary.

use crate::error::Result;
use crate::types::{TaskResult, WorkItem};

mod pool;

pub use pool::WorkerPool;

/// Handle to a submitted batch
#[async_trait::async_trait]
pub trait BatchHandle: Send {
    /// Number of items submitted in the batch
    fn len(&self) -> usize;

    /// Returns true if the batch was submitted empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking check that every item has finished
    fn is_ready(&self) -> bool;

    /// Block until every item has finished and return the results
    ///
    /// Items that ended without a result (hard time limit, retry cap) are
    /// absent from the returned list.
    ///
    /// # Errors
    /// Returns [`Error::Substrate`](crate::Error::Substrate) if the substrate
    /// abandoned any item before it reported.
    async fn wait(&mut self) -> Result<Vec<TaskResult>>;
}

/// Runs batches of work items on a pool of workers
#[async_trait::async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    /// Submit a batch for execution and return a handle to it
    async fn submit(&self, batch: Vec<WorkItem>) -> Result<Box<dyn BatchHandle>>;
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
