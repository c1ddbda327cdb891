//! ResetUrlsJob - second phase: re-arm the supplier's URL rows for parsing.

use serde::{Deserialize, Serialize};

use crate::kernel::jobs::CommandMeta;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetUrlsJob {
    pub session_id: i64,
}

impl ResetUrlsJob {
    pub const JOB_TYPE: &'static str = "reset_urls";

    pub fn new(session_id: i64) -> Self {
        Self { session_id }
    }
}

impl CommandMeta for ResetUrlsJob {
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
        let job = ResetUrlsJob::new(5);
        assert_eq!(job.job_type(), "reset_urls");
        assert_eq!(CommandMeta::session_id(&job), Some(5));
    }
}
