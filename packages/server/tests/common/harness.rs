//! Test harness with testcontainers for integration testing.
//!
//! A single Postgres container is started once and reused across every
//! test in the binary; each test gets its own billing project (and
//! therefore its own batch/job namespace) so tests never interfere with
//! one another despite sharing a database.

use anyhow::{Context, Result};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedInfra {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedInfra> = OnceCell::const_new();

impl SharedInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .start()
            .await
            .context("failed to start postgres container")?;
        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        pool.close().await;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async { Self::init().await.expect("failed to init shared test infra") })
            .await
    }
}

pub struct TestHarness {
    pub db: PgPool,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedInfra::get().await;
        let db = PgPool::connect(&infra.db_url).await?;
        Ok(Self { db })
    }

    /// Inserts an open billing project with a name unique to this call, so
    /// concurrent tests never collide on `batches.billing_project`.
    pub async fn billing_project(&self, name: &str) -> Result<String> {
        sqlx::query("INSERT INTO billing_projects (name, status) VALUES ($1, 'open')")
            .bind(name)
            .execute(&self.db)
            .await?;
        Ok(name.to_string())
    }
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("failed to create test harness")
    }

    async fn teardown(self) {
        self.db.close().await;
    }
}
