//! Typed errors for the job queue.
//!
//! The Lifecycle Driver turns every variant into a backoff decision, so the
//! variants follow how a failure should be waited out rather than where it
//! came from.

use thiserror::Error;

use crate::kernel::traits::FetchError;

#[derive(Debug, Error)]
pub enum JobError {
    /// No claimable job right now
    #[error("no claimable job")]
    EmptyQueue,

    /// The provider throttled us; the job was handed back
    #[error("provider rate limited job {job_id}")]
    RateLimited { job_id: i64 },

    /// The claimed job targets a tracker this node does not serve
    #[error("job {job_id} targets tracker {tracker} which this node does not serve")]
    CapabilityMismatch { job_id: i64, tracker: i32 },

    /// A tracker name that is not registered in the store
    #[error("unknown tracker: {name}")]
    UnknownTracker { name: String },

    /// Fetch failed; the job stays claimable unless its attempts are spent
    #[error("fetch for job {job_id} failed: {source}")]
    Fetch {
        job_id: i64,
        #[source]
        source: FetchError,
    },

    /// The job payload does not decode; the job is failed permanently
    #[error("job {job_id} has invalid args: {source}")]
    InvalidArgs {
        job_id: i64,
        #[source]
        source: serde_json::Error,
    },

    /// Malformed bulk input; nothing was written
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// The lease expired or was taken over before write-back
    #[error("lost lease on job {job_id}")]
    LostLease { job_id: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl JobError {
    /// Whether the error is the steady-state "nothing to do" signal.
    pub fn is_empty_queue(&self) -> bool {
        matches!(self, JobError::EmptyQueue)
    }

    pub fn job_id(&self) -> Option<i64> {
        match self {
            JobError::RateLimited { job_id }
            | JobError::CapabilityMismatch { job_id, .. }
            | JobError::Fetch { job_id, .. }
            | JobError::InvalidArgs { job_id, .. }
            | JobError::LostLease { job_id } => Some(*job_id),
            _ => None,
        }
    }
}
