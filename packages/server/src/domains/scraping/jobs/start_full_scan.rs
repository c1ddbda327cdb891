//! StartFullScanJob - orchestrator entrypoint.
//!
//! Finds or creates the supplier's session and starts the phase chain
//! exactly once (the dispatch guard is the single chokepoint preventing
//! duplicate pipeline starts).

use serde::{Deserialize, Serialize};

use crate::kernel::jobs::CommandMeta;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartFullScanJob {
    pub supplier_name: String,
    /// Collect-only runs finalize after the collect phase.
    #[serde(default)]
    pub collect_only: bool,
}

impl StartFullScanJob {
    pub const JOB_TYPE: &'static str = "start_full_scan";

    pub fn new(supplier_name: &str) -> Self {
        Self {
            supplier_name: supplier_name.to_string(),
            collect_only: false,
        }
    }

    pub fn collect_only(supplier_name: &str) -> Self {
        Self {
            supplier_name: supplier_name.to_string(),
            collect_only: true,
        }
    }
}

impl CommandMeta for StartFullScanJob {
    fn job_type(&self) -> &'static str {
        Self::JOB_TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_type_is_stable() {
        let job = StartFullScanJob::new("acme");
        assert_eq!(job.job_type(), "start_full_scan");
        assert!(!job.collect_only);
    }

    #[test]
    fn collect_only_flag_survives_serialization() {
        let job = StartFullScanJob::collect_only("acme");
        let json = serde_json::to_string(&job).unwrap();
        let deserialized: StartFullScanJob = serde_json::from_str(&json).unwrap();
        assert!(deserialized.collect_only);
        assert_eq!(deserialized.supplier_name, "acme");
    }
}
