//! ParseBatchJob - the parse control loop.
//!
//! Each instance runs the subprocess for exactly one bounded batch, then
//! re-dispatches a fresh instance while claimable work remains. The batch
//! index rides along so the safety valve can bound the loop.

use serde::{Deserialize, Serialize};

use crate::kernel::jobs::CommandMeta;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseBatchJob {
    pub session_id: i64,
    /// 0-based count of batches dispatched before this one.
    #[serde(default)]
    pub batch_index: i32,
}

impl ParseBatchJob {
    pub const JOB_TYPE: &'static str = "parse_batch";

    pub fn first(session_id: i64) -> Self {
        Self {
            session_id,
            batch_index: 0,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            session_id: self.session_id,
            batch_index: self.batch_index + 1,
        }
    }
}

impl CommandMeta for ParseBatchJob {
    fn job_type(&self) -> &'static str {
        Self::JOB_TYPE
    }

    fn session_id(&self) -> Option<i64> {
        Some(self.session_id)
    }
}
