//! Kernel: infrastructure shared by all domains.

pub mod jobs;
pub mod process;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::ScraperConfig;
use jobs::JobQueue;
use process::{ProcessRunner, ScraperProcess};

/// Shared dependencies handed to job handlers and HTTP routes.
pub struct ServerDeps {
    pub db_pool: PgPool,
    pub scraper: ScraperConfig,
    pub process: Arc<dyn ProcessRunner>,
    pub jobs: JobQueue,
}

impl ServerDeps {
    /// Production wiring: real subprocess runner, queue on the same pool.
    pub fn new(db_pool: PgPool, scraper: ScraperConfig) -> Self {
        let jobs = JobQueue::new(db_pool.clone());
        Self {
            db_pool,
            scraper,
            process: Arc::new(ScraperProcess),
            jobs,
        }
    }

    /// Wiring with an injected process runner (tests use a fake).
    pub fn with_process(
        db_pool: PgPool,
        scraper: ScraperConfig,
        process: Arc<dyn ProcessRunner>,
    ) -> Self {
        let jobs = JobQueue::new(db_pool.clone());
        Self {
            db_pool,
            scraper,
            process,
            jobs,
        }
    }
}
