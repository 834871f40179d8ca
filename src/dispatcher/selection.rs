//! Per-chunk filtering of scanned records.

use crate::db::CdxRecordSpecimen;
use crate::types::{RecordId, SkipReason, WorkItem, is_error_status};
use std::collections::HashSet;

/// Outcome of filtering one chunk
#[derive(Debug, Default)]
pub struct Selection {
    /// Records to dispatch, in scan order
    pub items: Vec<WorkItem>,
    /// Records left out, in scan order
    pub skipped: Vec<(RecordId, SkipReason)>,
}

/// Split a scanned chunk into work to dispatch and records to skip
///
/// The error-status check comes first, so an excluded record is reported as
/// excluded even if an outcome row somehow exists for it.
pub fn select_for_dispatch(
    records: &[CdxRecordSpecimen],
    gathered: &HashSet<RecordId>,
    failed: &HashSet<RecordId>,
) -> Selection {
    let mut selection = Selection::default();

    for record in records {
        let skip = if is_error_status(record.status_code) {
            Some(SkipReason::ErrorStatus)
        } else if gathered.contains(&record.id) {
            Some(SkipReason::AlreadyGathered)
        } else if failed.contains(&record.id) {
            Some(SkipReason::AlreadyFailed)
        } else {
            None
        };

        match skip {
            Some(reason) => selection.skipped.push((record.id, reason)),
            None => selection.items.push(WorkItem::from(record)),
        }
    }

    selection
}
