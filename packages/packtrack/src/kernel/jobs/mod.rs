//! Distributed scrape job queue.
//!
//! - [`PostgresJobStore`] - shared, lease-based job store
//! - [`claim_and_process`] - claim one job, fetch outside the lock, write back
//! - [`JobDriver`] - per-node polling loop with differentiated backoff
//! - [`enqueue_range`] - bulk enqueue of an identifier range
//!
//! # Architecture
//!
//! ```text
//! insert-range ─► enqueue_range ─► JobStore.bulk_enqueue (one tx)
//!
//! JobDriver (one per node)
//!     │
//!     ├─► claim_and_process
//!     │       ├─► JobStore.claim_next      (tx 1, served trackers, SKIP LOCKED, lease)
//!     │       ├─► CapabilityRegistry.get   (mismatch -> release)
//!     │       ├─► provider.fetch           (no locks held)
//!     │       └─► JobStore.complete/release (tx 2, lease guarded)
//!     └─► BackoffPolicy.wait_for(outcome)
//! ```

mod claim;
mod driver;
mod enqueue;
mod error;
mod job;
mod store;
pub mod testing;

pub use claim::{claim_and_process, ClaimSettings, ProcessedJob};
pub use driver::{Backoff, BackoffPolicy, JobDriver};
pub use enqueue::{enqueue_range, IdentifierRange};
pub use error::JobError;
pub use job::{JobStatus, PerformStats, ScrapeJob, TrackArgs, Tracker};
pub use store::{
    ClaimedJob, CompletedJob, JobStore, PostgresJobStore, Release, ReleaseOutcome, ReleasePlan,
    ENQUEUE_CHUNK_SIZE,
};
pub use testing::MemoryJobStore;
