//! Postgres-backed enqueue API for background jobs.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use super::job::Job;

/// Metadata a serializable command provides so it can ride the jobs table.
pub trait CommandMeta: Serialize {
    /// The job type identifier stored in `jobs.job_type`.
    fn job_type(&self) -> &'static str;

    /// The parsing session this command belongs to, when there is one.
    fn session_id(&self) -> Option<i64> {
        None
    }
}

/// Thin enqueue handle shared by HTTP actions and job handlers.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a command for immediate execution.
    pub async fn enqueue<C: CommandMeta>(&self, cmd: C) -> Result<Uuid> {
        self.insert(cmd, None).await
    }

    /// Enqueue a command to run no earlier than `delay` from now.
    pub async fn enqueue_in<C: CommandMeta>(&self, cmd: C, delay: Duration) -> Result<Uuid> {
        let run_at = Utc::now() + chrono::Duration::from_std(delay)?;
        self.insert(cmd, Some(run_at)).await
    }

    async fn insert<C: CommandMeta>(
        &self,
        cmd: C,
        run_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<Uuid> {
        let job = Job::new(
            cmd.job_type(),
            cmd.session_id(),
            serde_json::to_value(&cmd)?,
            run_at,
        );
        let job = job.insert(&self.pool).await?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            session_id = ?job.session_id,
            run_at = ?job.next_run_at,
            "Enqueued job"
        );
        Ok(job.id)
    }
}
