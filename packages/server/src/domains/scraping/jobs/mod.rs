//! Phase jobs for the scraping pipeline.
//!
//! All of them run with queue-level retry disabled: a crash or failure never
//! silently restarts the pipeline. Recovery decisions live in the handlers
//! and the registered failure hook.

mod collect_urls;
mod handlers;
mod parse_batch;
mod reset_urls;
mod start_full_scan;

pub use collect_urls::CollectUrlsJob;
pub use handlers::{
    handle_collect_urls, handle_parse_batch, handle_reset_urls, handle_start_full_scan,
    register_scraping_jobs, start_full_scan, StartScanOutcome,
};
pub use parse_batch::ParseBatchJob;
pub use reset_urls::ResetUrlsJob;
pub use start_full_scan::StartFullScanJob;
