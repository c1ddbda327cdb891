//! CollectUrlsJob - first phase: discover candidate URLs for the supplier.

use serde::{Deserialize, Serialize};

use crate::kernel::jobs::CommandMeta;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectUrlsJob {
    pub session_id: i64,
}

impl CollectUrlsJob {
    pub const JOB_TYPE: &'static str = "collect_urls";

    pub fn new(session_id: i64) -> Self {
        Self { session_id }
    }
}

impl CommandMeta for CollectUrlsJob {
    fn job_type(&self) -> &'static str {
        Self::JOB_TYPE
    }

    fn session_id(&self) -> Option<i64> {
        Some(self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_session_reference() {
        let job = CollectUrlsJob::new(9);
        assert_eq!(job.job_type(), "collect_urls");
        assert_eq!(CommandMeta::session_id(&job), Some(9));
    }
}
