//! Job registry mapping job type strings to handlers.
//!
//! Each domain registers its job types at startup. When a worker claims a
//! job, the registry deserializes the payload and executes the handler in
//! one step. A job type may also register a failure hook: workers invoke it
//! after a handler error, and it owns the recovery decision (there is no
//! queue-level retry).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;

use super::job::Job;
use crate::kernel::ServerDeps;

type BoxedHandler = Box<
    dyn Fn(serde_json::Value, Arc<ServerDeps>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

type BoxedFailureHook = Box<
    dyn Fn(Job, Arc<ServerDeps>, String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

struct JobRegistration {
    handler: BoxedHandler,
    on_failed: Option<BoxedFailureHook>,
}

#[derive(Default)]
pub struct JobRegistry {
    registrations: HashMap<&'static str, JobRegistration>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler for a job type.
    pub fn register<C, H, Fut>(&mut self, job_type: &'static str, handler: H)
    where
        C: DeserializeOwned + Send + 'static,
        H: Fn(C, Arc<ServerDeps>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: BoxedHandler = Box::new(move |args, deps| {
            match serde_json::from_value::<C>(args) {
                Ok(cmd) => Box::pin(handler(cmd, deps))
                    as Pin<Box<dyn Future<Output = Result<()>> + Send>>,
                Err(e) => Box::pin(async move {
                    Err(anyhow!("failed to deserialize {} args: {}", job_type, e))
                }),
            }
        });
        self.registrations.insert(
            job_type,
            JobRegistration {
                handler,
                on_failed: None,
            },
        );
    }

    /// Attach a failure hook to an already-registered job type.
    pub fn on_failed<H, Fut>(&mut self, job_type: &'static str, hook: H)
    where
        H: Fn(Job, Arc<ServerDeps>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(registration) = self.registrations.get_mut(job_type) {
            registration.on_failed = Some(Box::new(move |job, deps, error| {
                Box::pin(hook(job, deps, error))
            }));
        }
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.registrations.contains_key(job_type)
    }

    /// Deserialize and execute a claimed job.
    pub async fn execute(&self, job: &Job, deps: Arc<ServerDeps>) -> Result<()> {
        let registration = self
            .registrations
            .get(job.job_type.as_str())
            .ok_or_else(|| anyhow!("unknown job type: {}", job.job_type))?;
        let args = job
            .args
            .clone()
            .ok_or_else(|| anyhow!("job {} has no args", job.id))?;
        (registration.handler)(args, deps).await
    }

    /// Run the failure hook for a job type, if one is registered.
    pub async fn run_failure_hook(&self, job: &Job, deps: Arc<ServerDeps>, error: &str) {
        if let Some(registration) = self.registrations.get(job.job_type.as_str()) {
            if let Some(hook) = &registration.on_failed {
                hook(job.clone(), deps, error.to_string()).await;
            }
        }
    }
}
