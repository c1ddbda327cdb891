//! Job infrastructure for background phase execution.
//!
//! - [`Job`] - job record with atomic claiming and lease management
//! - [`JobQueue`] - enqueue API used by actions and handlers
//! - [`JobRegistry`] - job type string → handler + failure hook
//! - [`JobWorker`] - long-running polling worker
//!
//! Business logic stays in the domains; this module only moves jobs.
//! Queue-level automatic retry is deliberately absent: a failed handler is
//! marked failed once and its failure hook decides what that means.

mod job;
mod queue;
mod registry;
mod worker;

pub use job::{Job, JobStatus};
pub use queue::{CommandMeta, JobQueue};
pub use registry::JobRegistry;
pub use worker::{JobWorker, JobWorkerConfig};
