//! Bulk enqueue of a numeric identifier range.

use std::time::Instant;

use chrono::Utc;
use tracing::info;

use super::error::JobError;
use super::job::TrackArgs;
use super::store::{JobStore, ENQUEUE_CHUNK_SIZE};

/// Half-open range `[start, end)` of shipment identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierRange {
    start: i64,
    end: i64,
}

impl IdentifierRange {
    pub fn new(start: i64, end: i64) -> Result<Self, JobError> {
        if start > end {
            return Err(JobError::Constraint(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end.abs_diff(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn identifiers(&self) -> impl Iterator<Item = String> {
        (self.start..self.end).map(|n| n.to_string())
    }

    /// Consecutive sub-ranges of at most `size` identifiers.
    pub fn batches(&self, size: usize) -> impl Iterator<Item = IdentifierRange> {
        let size = size.max(1);
        let step = i64::try_from(size).unwrap_or(i64::MAX);
        let end = self.end;
        (self.start..self.end)
            .step_by(size)
            .map(move |start| IdentifierRange {
                start,
                end: start.saturating_add(step).min(end),
            })
    }
}

/// Enqueue one job per identifier in `range` for `tracker_id`, atomically.
///
/// Payloads are built one chunk at a time while the insert runs.
pub async fn enqueue_range(
    store: &dyn JobStore,
    tracker_id: i32,
    range: IdentifierRange,
) -> Result<u64, JobError> {
    let started = Instant::now();
    let now = Utc::now();

    let mut batches = range.batches(ENQUEUE_CHUNK_SIZE).map(|batch| {
        batch
            .identifiers()
            .map(|q| TrackArgs::new(q).to_value())
            .collect::<Vec<_>>()
    });

    let inserted = store.enqueue_batches(tracker_id, now, &mut batches).await?;

    info!(
        tracker_id,
        start = range.start(),
        end = range.end(),
        inserted,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "enqueued identifier range"
    );

    Ok(inserted)
}
