//! In-memory job store for tests.
//!
//! Follows the same lease rules as [`PostgresJobStore`](super::PostgresJobStore)
//! so the claim protocol and the driver can be exercised without a database.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::JobError;
use super::job::{JobStatus, ScrapeJob, Tracker};
use super::store::{
    check_batch_lengths, ClaimedJob, CompletedJob, JobStore, Release, ReleaseOutcome,
};

struct State {
    trackers: Vec<Tracker>,
    jobs: Vec<ScrapeJob>,
    next_id: i64,
}

pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    /// Store seeded with the `bring` tracker as id 1, like the migrations.
    pub fn new() -> Self {
        Self::with_trackers(vec![Tracker::new(1, "bring")])
    }

    pub fn with_trackers(trackers: Vec<Tracker>) -> Self {
        Self {
            state: Mutex::new(State {
                trackers,
                jobs: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Snapshot of every row in id order
    pub async fn jobs(&self) -> Vec<ScrapeJob> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn job(&self, id: i64) -> Option<ScrapeJob> {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .find(|j| j.id == id)
            .cloned()
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn count_by_status(&self, status: JobStatus) -> usize {
        self.state
            .lock()
            .await
            .jobs
            .iter()
            .filter(|j| j.status == status)
            .count()
    }

    /// Push every live lease into the past, as if the holders crashed.
    pub async fn expire_leases(&self) {
        let past = Utc::now() - chrono::Duration::seconds(1);
        for job in self.state.lock().await.jobs.iter_mut() {
            if job.lease_token.is_some() {
                job.lease_expires_at = Some(past);
            }
        }
    }
}

fn leased_row<'a>(
    jobs: &'a mut [ScrapeJob],
    claim: &ClaimedJob,
) -> Result<&'a mut ScrapeJob, JobError> {
    jobs.iter_mut()
        .find(|j| {
            j.id == claim.id
                && j.lease_token == Some(claim.lease_token)
                && j.status == JobStatus::Created
        })
        .ok_or(JobError::LostLease { job_id: claim.id })
}

fn clear_lease(job: &mut ScrapeJob) {
    job.claimed_by = None;
    job.lease_token = None;
    job.lease_expires_at = None;
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn bulk_enqueue(
        &self,
        tracker_id: i32,
        payloads: &[serde_json::Value],
        created_at: &[DateTime<Utc>],
    ) -> Result<u64, JobError> {
        check_batch_lengths(payloads.len(), created_at.len())?;

        let mut state = self.state.lock().await;
        if !state.trackers.iter().any(|t| t.id == tracker_id) {
            return Err(JobError::Constraint(format!(
                "tracker {} does not exist",
                tracker_id
            )));
        }

        for (args, created) in payloads.iter().zip(created_at) {
            let id = state.next_id;
            state.next_id += 1;
            state
                .jobs
                .push(ScrapeJob::new(id, tracker_id, args.clone(), *created));
        }

        Ok(payloads.len() as u64)
    }

    async fn enqueue_batches(
        &self,
        tracker_id: i32,
        created_at: DateTime<Utc>,
        batches: &mut (dyn Iterator<Item = Vec<serde_json::Value>> + Send),
    ) -> Result<u64, JobError> {
        let payloads: Vec<serde_json::Value> = batches.flatten().collect();
        let created = vec![created_at; payloads.len()];
        self.bulk_enqueue(tracker_id, &payloads, &created).await
    }

    async fn list_trackers(&self) -> Result<Vec<Tracker>, JobError> {
        Ok(self.state.lock().await.trackers.clone())
    }

    async fn claim_next(
        &self,
        node_id: &str,
        trackers: &[i32],
        lease: Duration,
    ) -> Result<ClaimedJob, JobError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| JobError::Constraint(format!("lease out of range: {}", e)))?;

        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .iter_mut()
            .filter(|j| trackers.contains(&j.tracker) && j.is_claimable(now))
            .min_by_key(|j| j.id)
            .ok_or(JobError::EmptyQueue)?;

        let lease_token = Uuid::new_v4();
        job.claimed_by = Some(node_id.to_string());
        job.lease_token = Some(lease_token);
        job.lease_expires_at = Some(now + lease);

        Ok(ClaimedJob {
            id: job.id,
            tracker: job.tracker,
            args: job.args.clone(),
            attempts: job.attempts,
            lease_token,
            node_id: node_id.to_string(),
            claimed_at: now,
        })
    }

    async fn complete(&self, claim: &ClaimedJob, outcome: CompletedJob) -> Result<(), JobError> {
        let stats = serde_json::to_value(&outcome.stats)?;
        let mut state = self.state.lock().await;
        let job = leased_row(&mut state.jobs, claim)?;

        job.status = JobStatus::Success;
        job.start_time = Some(outcome.start_time);
        job.end_time = Some(outcome.end_time);
        job.stats = Some(stats);
        job.resp = Some(outcome.resp);
        job.last_error = None;
        clear_lease(job);

        Ok(())
    }

    async fn release(&self, claim: &ClaimedJob, release: Release) -> Result<ReleaseOutcome, JobError> {
        let plan = release.plan(claim.attempts);
        let mut state = self.state.lock().await;
        let job = leased_row(&mut state.jobs, claim)?;

        job.attempts += plan.attempts_delta;
        job.last_error = Some(plan.error);
        clear_lease(job);

        if plan.fail {
            job.status = JobStatus::Failed;
            job.start_time = Some(claim.claimed_at);
            job.end_time = Some(Utc::now());
            Ok(ReleaseOutcome::DeadLettered)
        } else {
            Ok(ReleaseOutcome::Requeued)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::kernel::jobs::{claim_and_process, ClaimSettings, TrackArgs};
    use crate::kernel::{CapabilityRegistry, MockTrackingProvider};

    const LEASE: Duration = Duration::from_secs(300);

    async fn seed(store: &MemoryJobStore, identifiers: &[&str]) {
        let payloads: Vec<_> = identifiers.iter().map(|q| TrackArgs::new(*q).to_value()).collect();
        let created = vec![Utc::now(); payloads.len()];
        store.bulk_enqueue(1, &payloads, &created).await.unwrap();
    }

    #[tokio::test]
    async fn test_claims_oldest_first() {
        let store = MemoryJobStore::new();
        seed(&store, &["a", "b", "c"]).await;

        let first = store.claim_next("node-a", &[1], LEASE).await.unwrap();
        let second = store.claim_next("node-a", &[1], LEASE).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn test_claims_skip_trackers_not_asked_for() {
        let store = MemoryJobStore::with_trackers(vec![Tracker::new(1, "bring"), Tracker::new(2, "posten")]);
        store
            .bulk_enqueue(2, &[TrackArgs::new("foreign").to_value()], &[Utc::now()])
            .await
            .unwrap();
        seed(&store, &["a"]).await;

        let claim = store.claim_next("node-a", &[1], LEASE).await.unwrap();
        assert_eq!((claim.id, claim.tracker), (2, 1));
        assert!(store.claim_next("node-a", &[1], LEASE).await.unwrap_err().is_empty_queue());
        assert!(store.claim_next("node-a", &[], LEASE).await.unwrap_err().is_empty_queue());
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_overlap() {
        let store = Arc::new(MemoryJobStore::new());
        let identifiers: Vec<String> = (0..50).map(|n| n.to_string()).collect();
        let refs: Vec<&str> = identifiers.iter().map(String::as_str).collect();
        seed(&store, &refs).await;

        let mut handles = Vec::new();
        for node in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                loop {
                    match store.claim_next(&format!("node-{}", node), &[1], LEASE).await {
                        Ok(job) => claimed.push(job.id),
                        Err(JobError::EmptyQueue) => break,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job {} claimed twice", id);
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_mismatched_batch_writes_nothing() {
        let store = MemoryJobStore::new();
        seed(&store, &["a"]).await;

        let payloads = vec![TrackArgs::new("b").to_value(), TrackArgs::new("c").to_value()];
        let err = store
            .bulk_enqueue(1, &payloads, &[Utc::now()])
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Constraint(_)));
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = MemoryJobStore::new();
        assert_eq!(store.bulk_enqueue(1, &[], &[]).await.unwrap(), 0);
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable_and_old_holder_loses_it() {
        let store = MemoryJobStore::new();
        seed(&store, &["a"]).await;

        let stale = store.claim_next("node-a", &[1], LEASE).await.unwrap();
        assert!(store.claim_next("node-b", &[1], LEASE).await.unwrap_err().is_empty_queue());

        store.expire_leases().await;
        let fresh = store.claim_next("node-b", &[1], LEASE).await.unwrap();
        assert_eq!(fresh.id, stale.id);

        let err = store
            .release(&stale, Release::Requeue { reason: "late".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::LostLease { job_id } if job_id == stale.id));
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let store = MemoryJobStore::new();
        seed(&store, &["1000001", "1000002", "1000003"]).await;

        let provider = MockTrackingProvider::new("bring");
        let trackers = store.list_trackers().await.unwrap();
        let registry =
            CapabilityRegistry::resolve(&trackers, vec![Arc::new(provider.clone())]).unwrap();
        let settings = ClaimSettings::new("node-a");

        for _ in 0..3 {
            claim_and_process(&store, &registry, &settings).await.unwrap();
        }
        assert!(claim_and_process(&store, &registry, &settings)
            .await
            .unwrap_err()
            .is_empty_queue());

        for job in store.jobs().await {
            assert_eq!(job.status, JobStatus::Success);
            assert!(job.resp.is_some());
            assert!(job.start_time.unwrap() <= job.end_time.unwrap());
            assert_eq!(job.stats, Some(serde_json::json!({ "node_id": "node-a" })));
        }
        assert_eq!(provider.calls(), vec!["1000001", "1000002", "1000003"]);
    }
}
