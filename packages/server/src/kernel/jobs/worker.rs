//! Job worker: polls the queue, executes handlers, records outcomes.
//!
//! Workers claim jobs in small batches with `FOR UPDATE SKIP LOCKED`, run
//! them concurrently, and extend the job lease while a handler is inflight.
//! A handler error marks the job failed and invokes the job type's failure
//! hook — workers never re-enqueue anything themselves. All recovery
//! decisions belong to the handlers and their hooks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::Job;
use super::registry::JobRegistry;
use crate::kernel::ServerDeps;

#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Maximum number of jobs to claim at once.
    pub batch_size: i64,
    /// How long to sleep when no jobs are available.
    pub poll_interval: Duration,
    /// How often to extend leases of running jobs.
    pub lease_heartbeat_interval: Duration,
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            poll_interval: Duration::from_secs(5),
            lease_heartbeat_interval: Duration::from_secs(30),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

pub struct JobWorker {
    registry: Arc<JobRegistry>,
    deps: Arc<ServerDeps>,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(registry: Arc<JobRegistry>, deps: Arc<ServerDeps>) -> Self {
        Self {
            registry,
            deps,
            config: JobWorkerConfig::default(),
        }
    }

    pub fn with_config(
        registry: Arc<JobRegistry>,
        deps: Arc<ServerDeps>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            registry,
            deps,
            config,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            "Job worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let jobs = match Job::claim_ready(
                &self.config.worker_id,
                self.config.batch_size,
                &self.deps.db_pool,
            )
            .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "Failed to claim jobs");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if jobs.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            debug!(count = jobs.len(), "Claimed jobs");

            let handles: Vec<_> = jobs
                .into_iter()
                .map(|job| self.process_job(job))
                .collect();
            futures::future::join_all(handles).await;
        }

        info!(worker_id = %self.config.worker_id, "Job worker stopped");
        Ok(())
    }

    async fn process_job(&self, job: Job) {
        let job_id = job.id;
        let job_type = job.job_type.clone();

        let result = self.execute_with_lease(&job).await;

        match result {
            Ok(()) => {
                debug!(job_id = %job_id, job_type = %job_type, "Job succeeded");
                if let Err(e) = Job::mark_succeeded(job_id, &self.deps.db_pool).await {
                    error!(job_id = %job_id, error = %e, "Failed to mark job as succeeded");
                }
            }
            Err(e) => {
                let error_msg = e.to_string();
                warn!(job_id = %job_id, job_type = %job_type, error = %e, "Job failed");
                if let Err(e) = Job::mark_failed(job_id, &error_msg, &self.deps.db_pool).await {
                    error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
                }
                self.registry
                    .run_failure_hook(&job, self.deps.clone(), &error_msg)
                    .await;
            }
        }
    }

    /// Execute the handler while periodically extending the job lease.
    async fn execute_with_lease(&self, job: &Job) -> Result<()> {
        let lease_cancel = CancellationToken::new();
        let heartbeat_cancel = lease_cancel.clone();
        let heartbeat_job = job.clone();
        let pool = self.deps.db_pool.clone();
        let interval = self.config.lease_heartbeat_interval;

        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick

            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeat_job.extend_lease(&pool).await {
                            warn!(job_id = %heartbeat_job.id, error = %e, "Lease heartbeat failed");
                        }
                    }
                }
            }
        });

        let result = self.registry.execute(job, self.deps.clone()).await;

        lease_cancel.cancel();
        let _ = heartbeat_handle.await;

        result
    }
}
