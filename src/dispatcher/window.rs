//! Sliding window of outstanding batches.

use crate::substrate::BatchHandle;
use std::collections::VecDeque;

/// A submitted batch awaiting collection
pub struct PendingBatch {
    /// Offset of the chunk the batch came from
    pub offset: u64,
    /// Handle returned by the substrate
    pub handle: Box<dyn BatchHandle>,
}

/// Ordered list of outstanding batches with the collection policy
///
/// After each chunk the dispatcher asks [`next_due`](Self::next_due) for at
/// most one batch to block on: the oldest, and only if it already finished or
/// more than `threshold` batches are outstanding. With one push and at most one
/// pop per chunk the window never holds more than `threshold + 1` batches.
pub struct BatchWindow {
    pending: VecDeque<PendingBatch>,
    threshold: usize,
    high_water: usize,
}

impl BatchWindow {
    /// Create an empty window
    pub fn new(threshold: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(threshold + 1),
            threshold,
            high_water: 0,
        }
    }

    /// Append a newly submitted batch
    pub fn push(&mut self, batch: PendingBatch) {
        self.pending.push_back(batch);
        self.high_water = self.high_water.max(self.pending.len());
    }

    /// Take the oldest batch if it is due for collection
    pub fn next_due(&mut self) -> Option<PendingBatch> {
        let oldest = self.pending.front()?;
        if oldest.handle.is_ready() || self.pending.len() > self.threshold {
            self.pending.pop_front()
        } else {
            None
        }
    }

    /// Take the oldest batch unconditionally (final drain)
    pub fn pop_oldest(&mut self) -> Option<PendingBatch> {
        self.pending.pop_front()
    }

    /// Outstanding batches
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is outstanding
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Largest number of batches ever outstanding at once
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}
