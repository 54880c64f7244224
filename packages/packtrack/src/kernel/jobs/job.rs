//! Scrape job and tracker models.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "scrape_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Created,
    Success,
    Failed,
}

impl JobStatus {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Created => write!(f, "created"),
            JobStatus::Success => write!(f, "success"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Job arguments for tracking providers: the shipment identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackArgs {
    pub q: String,
}

impl TrackArgs {
    pub fn new(q: impl Into<String>) -> Self {
        Self { q: q.into() }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({ "q": self.q })
    }
}

/// Metadata stored with a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformStats {
    pub node_id: String,
}

// ============================================================================
// Tracker Model
// ============================================================================

/// A registered provider capability.
#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub url: String,
}

impl Tracker {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            url: String::new(),
        }
    }

    /// Register a tracker (reference data is normally seeded by migrations)
    pub async fn insert(name: &str, description: &str, url: &str, pool: &PgPool) -> Result<Self> {
        let tracker = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO trackers (name, description, url)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, url
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(url)
        .fetch_one(pool)
        .await?;
        Ok(tracker)
    }
}

// ============================================================================
// Scrape Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: i64,
    pub tracker: i32,
    pub args: serde_json::Value,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub stats: Option<serde_json::Value>,
    pub resp: Option<Vec<u8>>,

    // Lease management
    pub claimed_by: Option<String>,
    pub lease_token: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    // Retry tracking
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl ScrapeJob {
    /// Fresh, unclaimed job row.
    pub fn new(id: i64, tracker: i32, args: serde_json::Value, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tracker,
            args,
            status: JobStatus::Created,
            created_at,
            start_time: None,
            end_time: None,
            stats: None,
            resp: None,
            claimed_by: None,
            lease_token: None,
            lease_expires_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    /// Whether a claim at `now` may take this row.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Created
            && self.lease_expires_at.map_or(true, |expires| expires < now)
    }

    pub async fn find_by_id(id: i64, pool: &PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>("SELECT * FROM scrape_jobs WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(job)
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>> {
        let jobs = sqlx::query_as::<_, Self>("SELECT * FROM scrape_jobs ORDER BY id ASC")
            .fetch_all(pool)
            .await?;
        Ok(jobs)
    }

    pub async fn count(pool: &PgPool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scrape_jobs")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub async fn count_by_status(status: JobStatus, pool: &PgPool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scrape_jobs WHERE status = $1")
            .bind(status)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_args_roundtrip_shape() {
        let args = TrackArgs::new("1000001");
        assert_eq!(args.to_value(), serde_json::json!({ "q": "1000001" }));

        let decoded: TrackArgs = serde_json::from_value(serde_json::json!({ "q": "42" })).unwrap();
        assert_eq!(decoded.q, "42");
    }

    #[test]
    fn test_track_args_rejects_missing_identifier() {
        let decoded = serde_json::from_value::<TrackArgs>(serde_json::json!({ "id": "42" }));
        assert!(decoded.is_err());
    }

    #[test]
    fn test_claimable_respects_status_and_lease() {
        let now = Utc::now();
        let mut job = ScrapeJob::new(1, 1, TrackArgs::new("1").to_value(), now);
        assert!(job.is_claimable(now));

        job.lease_expires_at = Some(now + chrono::Duration::seconds(30));
        assert!(!job.is_claimable(now));

        job.lease_expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_claimable(now));

        job.status = JobStatus::Success;
        assert!(!job.is_claimable(now));
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Created.is_terminal());
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_perform_stats_shape() {
        let stats = PerformStats {
            node_id: "node-a".into(),
        };
        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            serde_json::json!({ "node_id": "node-a" })
        );
    }
}
