//! Per-node lifecycle driver.
//!
//! Loops over [`claim_and_process`] forever and waits between iterations
//! according to how the last one ended. The loop stops only when the
//! shutdown token is cancelled; cancellation interrupts a wait, never an
//! in-flight claim.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::claim::{claim_and_process, ClaimSettings, ProcessedJob};
use super::error::JobError;
use super::store::JobStore;
use crate::kernel::capabilities::CapabilityRegistry;

/// How an iteration ended, as far as waiting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Idle,
    EmptyQueue,
    RateLimited,
    Error,
}

impl Backoff {
    pub fn classify(result: &Result<ProcessedJob, JobError>) -> Self {
        match result {
            Ok(_) => Backoff::Idle,
            Err(JobError::EmptyQueue) => Backoff::EmptyQueue,
            // Claims are filtered by served tracker, so a mismatch means the
            // store disagrees with this node's registry.
            Err(JobError::RateLimited { .. }) | Err(JobError::CapabilityMismatch { .. }) => {
                Backoff::RateLimited
            }
            Err(_) => Backoff::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub idle: Duration,
    pub empty_queue: Duration,
    pub rate_limited: Duration,
    pub error: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(1),
            empty_queue: Duration::from_secs(3),
            rate_limited: Duration::from_secs(10 * 60),
            error: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    pub fn wait_for(&self, backoff: Backoff) -> Duration {
        match backoff {
            Backoff::Idle => self.idle,
            Backoff::EmptyQueue => self.empty_queue,
            Backoff::RateLimited => self.rate_limited,
            Backoff::Error => self.error,
        }
    }
}

pub struct JobDriver {
    store: Arc<dyn JobStore>,
    capabilities: CapabilityRegistry,
    settings: ClaimSettings,
    policy: BackoffPolicy,
}

impl JobDriver {
    pub fn new(
        store: Arc<dyn JobStore>,
        capabilities: CapabilityRegistry,
        settings: ClaimSettings,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            capabilities,
            settings,
            policy,
        }
    }

    /// One claim attempt, logged and classified.
    pub async fn run_once(&self) -> Backoff {
        let result =
            claim_and_process(self.store.as_ref(), &self.capabilities, &self.settings).await;
        let node_id = self.settings.node_id.as_str();

        match &result {
            Ok(done) => debug!(job_id = done.job_id, node_id, "iteration succeeded"),
            Err(JobError::EmptyQueue) => debug!(node_id, "queue empty"),
            Err(e @ JobError::RateLimited { .. }) => {
                warn!(job_id = e.job_id(), node_id, "rate limited, backing off")
            }
            Err(e @ JobError::CapabilityMismatch { .. }) => {
                error!(job_id = e.job_id(), node_id, error = %e, "capability mismatch")
            }
            Err(e) => warn!(job_id = e.job_id(), node_id, error = %e, "job iteration failed"),
        }

        Backoff::classify(&result)
    }

    /// Poll until `shutdown` is cancelled. Returns the number of completed jobs.
    pub async fn run(&self, shutdown: CancellationToken) -> u64 {
        info!(
            node_id = %self.settings.node_id,
            trackers = ?self.capabilities.tracker_ids(),
            "job driver starting"
        );

        let mut completed = 0u64;
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let backoff = self.run_once().await;
            if backoff == Backoff::Idle {
                completed += 1;
            }

            let wait = self.policy.wait_for(backoff);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!(node_id = %self.settings.node_id, completed, "job driver stopped");
        completed
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::kernel::jobs::{JobStatus, MemoryJobStore, TrackArgs};
    use crate::kernel::traits::FetchError;
    use crate::kernel::{MockResponse, MockTrackingProvider};

    #[test]
    fn test_waits_are_distinct_and_rate_limit_dominates() {
        let policy = BackoffPolicy::default();
        let empty = policy.wait_for(Backoff::EmptyQueue);
        let limited = policy.wait_for(Backoff::RateLimited);
        let failed = policy.wait_for(Backoff::Error);

        assert_ne!(empty, limited);
        assert_ne!(empty, failed);
        assert_ne!(limited, failed);
        assert!(limited > failed * 10);
        assert!(limited > empty * 10);
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            Backoff::classify(&Err(JobError::EmptyQueue)),
            Backoff::EmptyQueue
        );
        assert_eq!(
            Backoff::classify(&Err(JobError::RateLimited { job_id: 1 })),
            Backoff::RateLimited
        );
        assert_eq!(
            Backoff::classify(&Err(JobError::CapabilityMismatch {
                job_id: 1,
                tracker: 9
            })),
            Backoff::RateLimited
        );
        assert_eq!(
            Backoff::classify(&Err(JobError::Fetch {
                job_id: 1,
                source: FetchError::Timeout
            })),
            Backoff::Error
        );
        assert_eq!(
            Backoff::classify(&Err(JobError::LostLease { job_id: 1 })),
            Backoff::Error
        );
    }

    fn driver_for(store: Arc<MemoryJobStore>, provider: &MockTrackingProvider) -> JobDriver {
        let mut capabilities = CapabilityRegistry::new();
        capabilities.register(1, Arc::new(provider.clone()));
        JobDriver::new(
            store,
            capabilities,
            ClaimSettings::new("node-a"),
            BackoffPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_run_once_reports_outcome() {
        let store = Arc::new(MemoryJobStore::new());
        let provider = MockTrackingProvider::new("bring").with_response(MockResponse::RateLimited);
        let driver = driver_for(store.clone(), &provider);

        assert_eq!(driver.run_once().await, Backoff::EmptyQueue);

        store
            .bulk_enqueue(1, &[TrackArgs::new("1").to_value()], &[Utc::now()])
            .await
            .unwrap();
        assert_eq!(driver.run_once().await, Backoff::RateLimited);
        assert_eq!(driver.run_once().await, Backoff::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_queue_until_cancelled() {
        let store = Arc::new(MemoryJobStore::new());
        let payloads: Vec<_> = (1..=3).map(|n| TrackArgs::new(n.to_string()).to_value()).collect();
        store
            .bulk_enqueue(1, &payloads, &vec![Utc::now(); 3])
            .await
            .unwrap();

        let provider = MockTrackingProvider::new("bring");
        let driver = driver_for(store.clone(), &provider);
        let shutdown = CancellationToken::new();

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { driver.run(shutdown).await })
        };

        // Three idle waits plus one empty-queue wait
        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.cancel();

        assert_eq!(handle.await.unwrap(), 3);
        assert_eq!(store.count_by_status(JobStatus::Success).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_long_wait() {
        let store = Arc::new(MemoryJobStore::new());
        store
            .bulk_enqueue(1, &[TrackArgs::new("1").to_value()], &[Utc::now()])
            .await
            .unwrap();
        let provider = MockTrackingProvider::new("bring").with_response(MockResponse::RateLimited);
        let driver = driver_for(store, &provider);
        let shutdown = CancellationToken::new();

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { driver.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();

        let completed = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver should stop promptly")
            .unwrap();
        assert_eq!(completed, 0);
        assert_eq!(provider.call_count(), 1);
    }
}
