//! Claim one job, fetch it outside the row lock, write the result back.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::error::JobError;
use super::job::PerformStats;
use super::store::{ClaimedJob, CompletedJob, JobStore, Release, ReleaseOutcome};
use crate::kernel::capabilities::CapabilityRegistry;
use crate::kernel::traits::FetchError;

/// Per-node settings for [`claim_and_process`].
#[derive(Debug, Clone)]
pub struct ClaimSettings {
    pub node_id: String,
    /// How long a claim stays exclusive before other nodes may take it over
    pub lease: Duration,
    pub fetch_timeout: Duration,
    /// Counted failures before a job is failed; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl ClaimSettings {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            lease: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(30),
            max_attempts: Some(25),
        }
    }

    /// A fetch must finish while the lease is still held, or another node
    /// can claim the same row mid-fetch.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.fetch_timeout >= self.lease {
            return Err(JobError::Constraint(format!(
                "fetch timeout ({:?}) must be shorter than the lease ({:?})",
                self.fetch_timeout, self.lease
            )));
        }
        Ok(())
    }
}

/// A job that reached `success`.
#[derive(Debug, Clone)]
pub struct ProcessedJob {
    pub job_id: i64,
    pub tracker: i32,
    pub identifier: String,
    pub bytes: usize,
}

/// Run the claim-and-complete protocol for a single job.
///
/// Every failure except a malformed payload or a spent attempt budget leaves
/// the job claimable again.
pub async fn claim_and_process(
    store: &dyn JobStore,
    capabilities: &CapabilityRegistry,
    settings: &ClaimSettings,
) -> Result<ProcessedJob, JobError> {
    settings.validate()?;

    let job = store
        .claim_next(&settings.node_id, &capabilities.tracker_ids(), settings.lease)
        .await?;
    let start_time = Utc::now();

    // The claim is already filtered by tracker; this only trips if a store
    // ignores the filter.
    let Some(provider) = capabilities.get(job.tracker) else {
        error!(
            job_id = job.id,
            tracker = job.tracker,
            node_id = %settings.node_id,
            "claimed job for a tracker this node does not serve"
        );
        store
            .release(
                &job,
                Release::Requeue {
                    reason: format!("tracker {} not served by {}", job.tracker, settings.node_id),
                },
            )
            .await?;
        return Err(JobError::CapabilityMismatch {
            job_id: job.id,
            tracker: job.tracker,
        });
    };

    let args = match job.track_args() {
        Ok(args) => args,
        Err(source) => {
            warn!(job_id = job.id, error = %source, "job args do not decode, failing job");
            store
                .release(
                    &job,
                    Release::Fail {
                        error: source.to_string(),
                    },
                )
                .await?;
            return Err(JobError::InvalidArgs {
                job_id: job.id,
                source,
            });
        }
    };

    debug!(job_id = job.id, identifier = %args.q, "fetching");

    let fetched = match tokio::time::timeout(settings.fetch_timeout, provider.fetch(&args.q)).await
    {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout),
    };

    let fetched = match fetched {
        Ok(fetched) => fetched,
        Err(source) => {
            release_failed(store, &job, &source, settings).await?;
            return Err(JobError::Fetch {
                job_id: job.id,
                source,
            });
        }
    };

    if fetched.rate_limited {
        store
            .release(
                &job,
                Release::Requeue {
                    reason: "rate limited".to_string(),
                },
            )
            .await?;
        return Err(JobError::RateLimited { job_id: job.id });
    }

    let bytes = fetched.body.len();
    store
        .complete(
            &job,
            CompletedJob {
                stats: PerformStats {
                    node_id: settings.node_id.clone(),
                },
                resp: fetched.body.to_vec(),
                start_time,
                end_time: Utc::now(),
            },
        )
        .await?;

    info!(job_id = job.id, identifier = %args.q, bytes, "job completed");

    Ok(ProcessedJob {
        job_id: job.id,
        tracker: job.tracker,
        identifier: args.q,
        bytes,
    })
}

async fn release_failed(
    store: &dyn JobStore,
    job: &ClaimedJob,
    source: &FetchError,
    settings: &ClaimSettings,
) -> Result<(), JobError> {
    let outcome = store
        .release(
            job,
            Release::Retry {
                error: source.to_string(),
                max_attempts: settings.max_attempts,
            },
        )
        .await?;

    if outcome == ReleaseOutcome::DeadLettered {
        error!(
            job_id = job.id,
            attempts = job.attempts + 1,
            error = %source,
            "attempt budget spent, job failed"
        );
    }
    Ok(())
}
