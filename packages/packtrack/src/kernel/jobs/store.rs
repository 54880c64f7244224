//! PostgreSQL-backed job store.
//!
//! A claim is split into two short transactions so no row lock is ever held
//! across the network fetch:
//!
//! ```text
//! claim_next   BEGIN; SELECT .. FOR UPDATE SKIP LOCKED; stamp lease; COMMIT
//!     │
//!     ├─► fetch (no locks held)
//!     │
//! complete     BEGIN; UPDATE .. WHERE lease_token = $token; COMMIT
//! release      BEGIN; UPDATE .. WHERE lease_token = $token; COMMIT
//! ```
//!
//! A row whose lease expired (node crashed mid-fetch) is claimable again.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::JobError;
use super::job::{PerformStats, TrackArgs, Tracker};

/// Rows written per INSERT statement during a bulk enqueue.
pub const ENQUEUE_CHUNK_SIZE: usize = 1000;

/// A job leased by one node.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: i64,
    pub tracker: i32,
    pub args: serde_json::Value,
    /// Failed attempts counted before this claim
    pub attempts: i32,
    pub lease_token: Uuid,
    pub node_id: String,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimedJob {
    /// Decode the args as a tracking request.
    pub fn track_args(&self) -> Result<TrackArgs, serde_json::Error> {
        serde_json::from_value(self.args.clone())
    }
}

/// Outcome of a fully successful fetch.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub stats: PerformStats,
    pub resp: Vec<u8>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// How a lease is handed back after a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// Return the row untouched; the attempt does not count.
    Requeue { reason: String },
    /// Count a failed attempt. Once `max_attempts` is reached the row is failed.
    Retry {
        error: String,
        max_attempts: Option<u32>,
    },
    /// Fail the row immediately.
    Fail { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The row is claimable again
    Requeued,
    /// The row is now `failed`
    DeadLettered,
}

/// What a release does to the row, shared by every store implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePlan {
    pub attempts_delta: i32,
    pub fail: bool,
    pub error: String,
}

impl Release {
    /// Resolve against the attempt count seen at claim time.
    pub fn plan(&self, attempts: i32) -> ReleasePlan {
        match self {
            Release::Requeue { reason } => ReleasePlan {
                attempts_delta: 0,
                fail: false,
                error: reason.clone(),
            },
            Release::Retry {
                error,
                max_attempts,
            } => {
                let spent = i64::from(attempts) + 1;
                ReleasePlan {
                    attempts_delta: 1,
                    fail: max_attempts.is_some_and(|max| spent >= i64::from(max)),
                    error: error.clone(),
                }
            }
            Release::Fail { error } => ReleasePlan {
                attempts_delta: 1,
                fail: true,
                error: error.clone(),
            },
        }
    }
}

/// Storage for scrape jobs shared by every node.
///
/// Implementations must guarantee that at most one live lease exists per
/// row and that `complete`/`release` only act on the lease they were given.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert all payloads or none of them.
    async fn bulk_enqueue(
        &self,
        tracker_id: i32,
        payloads: &[serde_json::Value],
        created_at: &[DateTime<Utc>],
    ) -> Result<u64, JobError>;

    /// Insert every batch `batches` yields in one transaction, all or none.
    ///
    /// Only one batch is held in memory at a time.
    async fn enqueue_batches(
        &self,
        tracker_id: i32,
        created_at: DateTime<Utc>,
        batches: &mut (dyn Iterator<Item = Vec<serde_json::Value>> + Send),
    ) -> Result<u64, JobError>;

    /// All registered trackers, in no particular order.
    async fn list_trackers(&self) -> Result<Vec<Tracker>, JobError>;

    async fn find_tracker(&self, name: &str) -> Result<Option<Tracker>, JobError> {
        let trackers = self.list_trackers().await?;
        Ok(trackers.into_iter().find(|t| t.name == name))
    }

    /// Lease the oldest claimable job for one of `trackers`. `EmptyQueue`
    /// when there is none.
    async fn claim_next(
        &self,
        node_id: &str,
        trackers: &[i32],
        lease: Duration,
    ) -> Result<ClaimedJob, JobError>;

    /// Mark a leased job `success` and persist its response.
    async fn complete(&self, job: &ClaimedJob, outcome: CompletedJob) -> Result<(), JobError>;

    /// Hand a leased job back.
    async fn release(&self, job: &ClaimedJob, release: Release) -> Result<ReleaseOutcome, JobError>;
}

pub(crate) fn check_batch_lengths(payloads: usize, created_at: usize) -> Result<(), JobError> {
    if payloads != created_at {
        return Err(JobError::Constraint(format!(
            "payloads ({}) and created_at ({}) must be equally long",
            payloads, created_at
        )));
    }
    Ok(())
}

async fn insert_chunk(
    tx: &mut Transaction<'_, Postgres>,
    tracker_id: i32,
    payloads: &[serde_json::Value],
    created_at: &[DateTime<Utc>],
) -> Result<u64, JobError> {
    let trackers = vec![tracker_id; payloads.len()];
    let result = sqlx::query(
        r#"
        INSERT INTO scrape_jobs (tracker, args, created_at)
        SELECT * FROM UNNEST($1::INT[], $2::JSONB[], $3::TIMESTAMPTZ[])
        "#,
    )
    .bind(&trackers)
    .bind(payloads)
    .bind(created_at)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

#[derive(FromRow)]
struct ClaimRow {
    id: i64,
    tracker: i32,
    args: serde_json::Value,
    attempts: i32,
}

/// PostgreSQL job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a small pool; each node holds at most a couple of
    /// connections at a time.
    pub async fn connect(database_url: &str) -> Result<Self, JobError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn bulk_enqueue(
        &self,
        tracker_id: i32,
        payloads: &[serde_json::Value],
        created_at: &[DateTime<Utc>],
    ) -> Result<u64, JobError> {
        check_batch_lengths(payloads.len(), created_at.len())?;
        if payloads.is_empty() {
            return Ok(0);
        }

        let total = payloads.len();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for (payload_chunk, created_chunk) in payloads
            .chunks(ENQUEUE_CHUNK_SIZE)
            .zip(created_at.chunks(ENQUEUE_CHUNK_SIZE))
        {
            inserted += insert_chunk(&mut tx, tracker_id, payload_chunk, created_chunk).await?;
            debug!(
                inserted,
                total,
                percent = %format!("{:.2}", inserted as f64 / total as f64 * 100.0),
                "bulk enqueue progress"
            );
        }

        tx.commit().await?;
        info!(tracker_id, inserted, "bulk enqueue committed");

        Ok(inserted)
    }

    async fn enqueue_batches(
        &self,
        tracker_id: i32,
        created_at: DateTime<Utc>,
        batches: &mut (dyn Iterator<Item = Vec<serde_json::Value>> + Send),
    ) -> Result<u64, JobError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for batch in batches {
            for payload_chunk in batch.chunks(ENQUEUE_CHUNK_SIZE) {
                let created_chunk = vec![created_at; payload_chunk.len()];
                inserted +=
                    insert_chunk(&mut tx, tracker_id, payload_chunk, &created_chunk).await?;
            }
            debug!(inserted, "bulk enqueue progress");
        }

        tx.commit().await?;
        info!(tracker_id, inserted, "bulk enqueue committed");

        Ok(inserted)
    }

    async fn list_trackers(&self) -> Result<Vec<Tracker>, JobError> {
        let trackers =
            sqlx::query_as::<_, Tracker>("SELECT id, name, description, url FROM trackers")
                .fetch_all(&self.pool)
                .await?;
        Ok(trackers)
    }

    async fn find_tracker(&self, name: &str) -> Result<Option<Tracker>, JobError> {
        let tracker = sqlx::query_as::<_, Tracker>(
            "SELECT id, name, description, url FROM trackers WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tracker)
    }

    async fn claim_next(
        &self,
        node_id: &str,
        trackers: &[i32],
        lease: Duration,
    ) -> Result<ClaimedJob, JobError> {
        let lease_token = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        // Oldest pending row of a served tracker without a live lease. Rows
        // locked by another node's claim are skipped instead of waited on.
        let row = sqlx::query_as::<_, ClaimRow>(
            r#"
            WITH next_job AS (
                SELECT id
                FROM scrape_jobs
                WHERE status = 'created'
                  AND tracker = ANY($4)
                  AND (lease_expires_at IS NULL OR lease_expires_at < NOW())
                ORDER BY id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE scrape_jobs
            SET
                claimed_by = $1,
                lease_token = $2,
                lease_expires_at = NOW() + ($3::TEXT || ' milliseconds')::INTERVAL
            WHERE id IN (SELECT id FROM next_job)
            RETURNING id, tracker, args, attempts
            "#,
        )
        .bind(node_id)
        .bind(lease_token)
        .bind(lease.as_millis().to_string())
        .bind(trackers)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        let row = row.ok_or(JobError::EmptyQueue)?;
        debug!(job_id = row.id, node_id, "claimed job");

        Ok(ClaimedJob {
            id: row.id,
            tracker: row.tracker,
            args: row.args,
            attempts: row.attempts,
            lease_token,
            node_id: node_id.to_string(),
            claimed_at: Utc::now(),
        })
    }

    async fn complete(&self, job: &ClaimedJob, outcome: CompletedJob) -> Result<(), JobError> {
        let stats = serde_json::to_value(&outcome.stats)?;
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET
                status = 'success',
                start_time = $3,
                end_time = $4,
                stats = $5,
                resp = $6,
                last_error = NULL,
                claimed_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL
            WHERE id = $1
              AND lease_token = $2
              AND status = 'created'
            "#,
        )
        .bind(job.id)
        .bind(job.lease_token)
        .bind(outcome.start_time)
        .bind(outcome.end_time)
        .bind(stats)
        .bind(&outcome.resp)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobError::LostLease { job_id: job.id });
        }

        tx.commit().await?;
        Ok(())
    }

    async fn release(&self, job: &ClaimedJob, release: Release) -> Result<ReleaseOutcome, JobError> {
        let plan = release.plan(job.attempts);
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET
                attempts = attempts + $3,
                last_error = $4,
                status = CASE WHEN $5 THEN 'failed'::scrape_job_status ELSE status END,
                start_time = CASE WHEN $5 THEN $6 ELSE start_time END,
                end_time = CASE WHEN $5 THEN $7 ELSE end_time END,
                claimed_by = NULL,
                lease_token = NULL,
                lease_expires_at = NULL
            WHERE id = $1
              AND lease_token = $2
              AND status = 'created'
            "#,
        )
        .bind(job.id)
        .bind(job.lease_token)
        .bind(plan.attempts_delta)
        .bind(&plan.error)
        .bind(plan.fail)
        .bind(job.claimed_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JobError::LostLease { job_id: job.id });
        }

        tx.commit().await?;

        Ok(if plan.fail {
            ReleaseOutcome::DeadLettered
        } else {
            ReleaseOutcome::Requeued
        })
    }
}
