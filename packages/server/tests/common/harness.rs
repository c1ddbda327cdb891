//! Test harness with testcontainers for integration testing.
//!
//! The Postgres container and migrations are initialized once on first use
//! and shared by every test; tests isolate themselves with unique supplier
//! names.

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::config::ScraperConfig;
use server_core::domains::scraping::jobs::register_scraping_jobs;
use server_core::kernel::jobs::{Job, JobRegistry};
use server_core::kernel::process::ProcessRunner;
use server_core::kernel::ServerDeps;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct SharedTestInfra {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
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

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
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
}

pub struct TestHarness {
    pub db_pool: PgPool,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        let infra = SharedTestInfra::get().await;
        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .expect("Failed to connect to test database");
        Self { db_pool }
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}

impl TestHarness {
    /// Deps wired with an injected (fake) process runner and a config tuned
    /// for tests: no inter-batch delay, small batches.
    pub fn deps_with(&self, process: Arc<dyn ProcessRunner>, batch_size: u32) -> Arc<ServerDeps> {
        let scraper = ScraperConfig {
            batch_size,
            parse_batch_delay_secs: 0,
            ..ScraperConfig::default()
        };
        Arc::new(ServerDeps::with_process(
            self.db_pool.clone(),
            scraper,
            process,
        ))
    }

    pub fn registry(&self) -> JobRegistry {
        let mut registry = JobRegistry::new();
        register_scraping_jobs(&mut registry);
        registry
    }
}

/// A supplier name no other test will touch.
pub fn unique_supplier(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Claim and execute jobs (including failure-hook bookkeeping, like the
/// worker does) until the queue is empty. Returns how many jobs ran.
pub async fn drain_queue(registry: &JobRegistry, deps: &Arc<ServerDeps>) -> usize {
    let mut processed = 0;
    loop {
        let jobs = Job::claim_ready("test-worker", 10, &deps.db_pool)
            .await
            .expect("Failed to claim jobs");
        if jobs.is_empty() {
            return processed;
        }
        for job in jobs {
            match registry.execute(&job, deps.clone()).await {
                Ok(()) => {
                    Job::mark_succeeded(job.id, &deps.db_pool)
                        .await
                        .expect("Failed to mark job succeeded");
                }
                Err(e) => {
                    Job::mark_failed(job.id, &e.to_string(), &deps.db_pool)
                        .await
                        .expect("Failed to mark job failed");
                    registry
                        .run_failure_hook(&job, deps.clone(), &e.to_string())
                        .await;
                }
            }
            processed += 1;
            assert!(processed < 200, "job queue did not drain");
        }
    }
}
