//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is shared by every test. Each test gets its own
//! freshly migrated database inside it, so queue state never leaks between
//! tests running in parallel.

use anyhow::{Context, Result};
use packtrack_core::kernel::jobs::{JobStore, PostgresJobStore, TrackArgs, Tracker};
use sqlx::{Connection, PgConnection, PgPool};
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    host: String,
    port: u16,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?.to_string();
        let port = postgres.get_host_port_ipv4(5432).await?;

        Ok(Self {
            host,
            port,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }

    fn url(&self, database: &str) -> String {
        format!(
            "postgresql://postgres:postgres@{}:{}/{}",
            self.host, self.port, database
        )
    }
}

/// Per-test database plus a job store on top of it.
///
/// ```ignore
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     ctx.seed(&["1000001"]).await;
/// }
/// ```
pub struct TestHarness {
    pub db_pool: PgPool,
    pub store: PostgresJobStore,
    pub database: String,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;

        let infra = SharedTestInfra::get().await;
        if let Ok(mut admin) = PgConnection::connect(&infra.url("postgres")).await {
            let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS {}", self.database))
                .execute(&mut admin)
                .await;
        }
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let database = format!("test_{}", Uuid::new_v4().simple());

        let mut admin = PgConnection::connect(&infra.url("postgres"))
            .await
            .context("Failed to connect to Postgres")?;
        sqlx::query(&format!("CREATE DATABASE {}", database))
            .execute(&mut admin)
            .await
            .context("Failed to create test database")?;
        admin.close().await?;

        let db_pool = PgPool::connect(&infra.url(&database))
            .await
            .context("Failed to connect to test database")?;
        let store = PostgresJobStore::new(db_pool.clone());
        store.migrate().await.context("Failed to run migrations")?;

        Ok(Self {
            db_pool,
            store,
            database,
        })
    }

    /// The seeded `bring` tracker
    pub async fn bring(&self) -> Tracker {
        self.store
            .find_tracker("bring")
            .await
            .expect("tracker lookup failed")
            .expect("bring tracker is seeded by migrations")
    }

    /// Enqueue one bring job per identifier, returning the tracker id.
    pub async fn seed(&self, identifiers: &[&str]) -> i32 {
        let tracker = self.bring().await;
        let payloads: Vec<_> = identifiers
            .iter()
            .map(|q| TrackArgs::new(*q).to_value())
            .collect();
        let created = vec![chrono::Utc::now(); payloads.len()];
        self.store
            .bulk_enqueue(tracker.id, &payloads, &created)
            .await
            .expect("seed enqueue failed");
        tracker.id
    }
}
