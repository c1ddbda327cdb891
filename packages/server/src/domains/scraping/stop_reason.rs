//! Stop-reason codes recorded on terminally failed (or notable) sessions.
//!
//! All codes are terminal and non-retriable; `ParsingSession::fail*` is the
//! only writer. Operators read these off the dashboard together with the
//! captured stderr/exception text.

pub const INVALID_STATE_FOR_COLLECT: &str = "INVALID_STATE_FOR_COLLECT";
pub const COLLECT_FAILED: &str = "COLLECT_FAILED";
pub const COLLECT_TIMEOUT: &str = "COLLECT_TIMEOUT";
pub const COLLECT_EXCEPTION: &str = "COLLECT_EXCEPTION";

pub const INVALID_STATE_FOR_RESET: &str = "INVALID_STATE_FOR_RESET";
pub const RESET_FAILED: &str = "RESET_FAILED";
pub const RESET_TIMEOUT: &str = "RESET_TIMEOUT";
pub const RESET_EXCEPTION: &str = "RESET_EXCEPTION";
pub const NO_PENDING_AFTER_RESET: &str = "NO_PENDING_AFTER_RESET";

pub const PARSE_BATCH_FAILED: &str = "PARSE_BATCH_FAILED";
pub const PARSE_TIMEOUT: &str = "PARSE_TIMEOUT";
pub const PARSE_EXCEPTION: &str = "PARSE_EXCEPTION";
pub const TOO_MANY_BLOCKED: &str = "TOO_MANY_BLOCKED";

/// Queue-level catch-all written by the job failure hook.
pub const JOB_FAILED: &str = "JOB_FAILED";

/// Cooperative cancellation observed by a phase job before spawning.
pub const CANCELED: &str = "CANCELED";

/// Subprocess reported a whole-run failure via the legacy `finish` event.
pub const REPORTED_FAILED: &str = "REPORTED_FAILED";

/// Subprocess reported partial success; the session still finishes
/// successfully but the distinction stays visible.
pub const PARTIAL: &str = "PARTIAL";
