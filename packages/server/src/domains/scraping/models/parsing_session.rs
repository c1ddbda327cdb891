//! Parsing session: the authoritative lifecycle record for one scraping run.
//!
//! All lifecycle mutations go through this model. Transition methods are
//! conditional UPDATEs keyed on the current lifecycle value — a `None`
//! return means the guard lost a race (another delivery already advanced
//! the session) and the caller treats the step as already done. Progress
//! fields written by the callback side use `GREATEST()` so out-of-order
//! deliveries can never regress state.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::kernel::process::truncate_output;

/// Fine-grained lifecycle driving the phase-job guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "parsing_lifecycle", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Created,
    Collecting,
    Collected,
    Resetting,
    ReadyToParse,
    Parsing,
    FinishedSuccess,
    FinishedFailed,
}

/// Coarse status mirror consumed by dashboards and legacy clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "parsing_session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    UrlsCollected,
    Completed,
    Failed,
    Canceling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "parsing_run_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    CollectOnly,
}

#[derive(FromRow, Debug, Clone, Serialize)]
pub struct ParsingSession {
    pub id: i64,
    pub supplier_name: String,
    pub session_run_id: Uuid,
    pub lifecycle_status: Lifecycle,
    pub status: SessionStatus,
    pub run_mode: RunMode,

    pub total_urls: i32,
    pub pages_processed: i32,
    pub items_updated: i32,
    pub errors_count: i32,
    pub collect_urls_count: Option<i32>,

    pub collect_started_at: Option<DateTime<Utc>>,
    pub collect_finished_at: Option<DateTime<Utc>>,
    pub reset_started_at: Option<DateTime<Utc>>,
    pub reset_finished_at: Option<DateTime<Utc>>,
    pub parse_started_at: Option<DateTime<Utc>>,
    pub parse_finished_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub pid: Option<i32>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub job_dispatched_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    pub error_message: Option<String>,
    pub collect_stats_json: Option<serde_json::Value>,
    pub parse_stats_json: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Pure guards
// =============================================================================

impl ParsingSession {
    /// Terminal sessions absorb: no phase job or callback may mutate them.
    /// Also honors the legacy coarse values for rows finalized by old code.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.lifecycle_status,
            Lifecycle::FinishedSuccess | Lifecycle::FinishedFailed
        ) || matches!(self.status, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// True once collect has started, regardless of how it went.
    pub fn has_collect_executed(&self) -> bool {
        self.collect_started_at.is_some()
    }

    pub fn can_start_collect(&self) -> bool {
        self.lifecycle_status == Lifecycle::Created && !self.has_collect_executed()
    }

    /// Reset runs exactly when collect finished and nothing else happened.
    pub fn needs_reset(&self) -> bool {
        self.lifecycle_status == Lifecycle::Collected
    }

    pub fn has_parsing_started(&self) -> bool {
        self.parse_started_at.is_some()
    }

    pub fn can_start_parsing(&self) -> bool {
        self.lifecycle_status == Lifecycle::ReadyToParse && !self.has_parsing_started()
    }

    /// Dispatch-debounce guard: the orchestrator entrypoint must not start a
    /// second phase chain for the same session.
    pub fn can_dispatch_job(&self) -> bool {
        !self.is_terminal() && self.job_dispatched_at.is_none()
    }

    pub fn is_canceling(&self) -> bool {
        self.status == SessionStatus::Canceling
    }
}

// =============================================================================
// SQL - creation and lookup
// =============================================================================

impl ParsingSession {
    pub async fn create(supplier_name: &str, run_mode: RunMode, pool: &PgPool) -> Result<Self> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            INSERT INTO parsing_sessions (supplier_name, session_run_id, run_mode)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(supplier_name)
        .bind(Uuid::new_v4())
        .bind(run_mode)
        .fetch_one(pool)
        .await?;
        Ok(session)
    }

    pub async fn find_by_id(id: i64, pool: &PgPool) -> Result<Option<Self>> {
        let session =
            sqlx::query_as::<_, ParsingSession>("SELECT * FROM parsing_sessions WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        Ok(session)
    }

    /// Most recent non-terminal session for a supplier, if any.
    pub async fn find_active_for_supplier(
        supplier_name: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            SELECT * FROM parsing_sessions
            WHERE supplier_name = $1
              AND lifecycle_status NOT IN ('finished_success', 'finished_failed')
              AND status NOT IN ('completed', 'failed')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(supplier_name)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }
}

// =============================================================================
// SQL - lifecycle transitions (guard-then-act, conditional on current state)
// =============================================================================

impl ParsingSession {
    /// Stamp `job_dispatched_at` iff no chain was dispatched yet.
    /// Returns false when another dispatch won the race.
    pub async fn mark_job_dispatched(&self, pool: &PgPool) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE parsing_sessions
            SET job_dispatched_at = NOW(), updated_at = NOW()
            WHERE id = $1
              AND job_dispatched_at IS NULL
              AND lifecycle_status NOT IN ('finished_success', 'finished_failed')
            "#,
        )
        .bind(self.id)
        .execute(pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    pub async fn start_collecting(&self, pool: &PgPool) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            UPDATE parsing_sessions
            SET lifecycle_status = 'collecting',
                status = 'running',
                collect_started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND lifecycle_status = 'created'
            RETURNING *
            "#,
        )
        .bind(self.id)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    pub async fn mark_collecting_done(&self, count: i32, pool: &PgPool) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            UPDATE parsing_sessions
            SET lifecycle_status = 'collected',
                status = 'urls_collected',
                collect_finished_at = NOW(),
                collect_urls_count = $2,
                total_urls = GREATEST(total_urls, $2),
                updated_at = NOW()
            WHERE id = $1 AND lifecycle_status = 'collecting'
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(count)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    pub async fn start_resetting(&self, pool: &PgPool) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            UPDATE parsing_sessions
            SET lifecycle_status = 'resetting',
                reset_started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND lifecycle_status = 'collected'
            RETURNING *
            "#,
        )
        .bind(self.id)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    pub async fn mark_reset_done(&self, pool: &PgPool) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            UPDATE parsing_sessions
            SET lifecycle_status = 'ready_to_parse',
                reset_finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND lifecycle_status = 'resetting'
            RETURNING *
            "#,
        )
        .bind(self.id)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    pub async fn start_parsing(&self, pool: &PgPool) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            UPDATE parsing_sessions
            SET lifecycle_status = 'parsing',
                status = 'running',
                parse_started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND lifecycle_status = 'ready_to_parse'
            RETURNING *
            "#,
        )
        .bind(self.id)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    pub async fn mark_parsing_completed(&self, pool: &PgPool) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            UPDATE parsing_sessions
            SET lifecycle_status = 'finished_success',
                status = 'completed',
                parse_finished_at = COALESCE(parse_finished_at, NOW()),
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND lifecycle_status = 'parsing'
            RETURNING *
            "#,
        )
        .bind(self.id)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    /// Terminal failure. Idempotent: a no-op on already-terminal sessions.
    pub async fn fail(&self, code: &str, message: &str, pool: &PgPool) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            UPDATE parsing_sessions
            SET lifecycle_status = 'finished_failed',
                status = 'failed',
                stop_reason = $2,
                error_message = $3,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND lifecycle_status NOT IN ('finished_success', 'finished_failed')
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(code)
        .bind(message)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    /// Terminal failure with subprocess context (exit code + captured stderr).
    pub async fn fail_with_process_error(
        &self,
        code: &str,
        exit_code: Option<i32>,
        stderr: &str,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let message = match exit_code {
            Some(exit) => format!(
                "subprocess exited with code {}: {}",
                exit,
                truncate_output(stderr.to_string(), 2048)
            ),
            None => format!(
                "subprocess did not complete: {}",
                truncate_output(stderr.to_string(), 2048)
            ),
        };
        self.fail(code, &message, pool).await
    }

    /// Callback-side success finalization. Used by the canonical
    /// finalization path (legacy `finish` and collect-only runs); the parse
    /// loop's own completion goes through `mark_parsing_completed`.
    pub async fn finalize_success(
        &self,
        stop_reason: Option<&str>,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            UPDATE parsing_sessions
            SET lifecycle_status = 'finished_success',
                status = 'completed',
                stop_reason = $2,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND lifecycle_status NOT IN ('finished_success', 'finished_failed')
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(stop_reason)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    /// Cooperative cancellation: flips the coarse status so the next
    /// callback response carries the stop command. No lifecycle effect.
    pub async fn request_cancel(id: i64, pool: &PgPool) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE parsing_sessions
            SET status = 'canceling', updated_at = NOW()
            WHERE id = $1
              AND lifecycle_status NOT IN ('finished_success', 'finished_failed')
              AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }
}

// =============================================================================
// SQL - monotonic progress and bookkeeping (callback side)
// =============================================================================

impl ParsingSession {
    /// Monotonic progress update: counters only go up, a stale delivery
    /// changes nothing. Promotes a `pending` session to `running`.
    pub async fn apply_progress(
        id: i64,
        pages_processed: i32,
        total_urls: Option<i32>,
        pool: &PgPool,
    ) -> Result<Option<Self>> {
        let session = sqlx::query_as::<_, ParsingSession>(
            r#"
            UPDATE parsing_sessions
            SET pages_processed = GREATEST(pages_processed, $2),
                total_urls = GREATEST(total_urls, COALESCE($3, total_urls)),
                last_heartbeat_at = NOW(),
                status = CASE WHEN status = 'pending'
                              THEN 'running'::parsing_session_status
                              ELSE status END,
                updated_at = NOW()
            WHERE id = $1
              AND lifecycle_status NOT IN ('finished_success', 'finished_failed')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(pages_processed)
        .bind(total_urls)
        .fetch_optional(pool)
        .await?;
        Ok(session)
    }

    /// Monotonic raise of `total_urls`.
    pub async fn raise_total_urls(id: i64, total_urls: i32, pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE parsing_sessions
            SET total_urls = GREATEST(total_urls, $2), updated_at = NOW()
            WHERE id = $1
              AND lifecycle_status NOT IN ('finished_success', 'finished_failed')
            "#,
        )
        .bind(id)
        .bind(total_urls)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Monotonic raise of the per-phase counters reported by the subprocess.
    pub async fn bump_phase_counters(
        id: i64,
        pages_processed: Option<i32>,
        items_updated: Option<i32>,
        errors_count: Option<i32>,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE parsing_sessions
            SET pages_processed = GREATEST(pages_processed, COALESCE($2, pages_processed)),
                items_updated = GREATEST(items_updated, COALESCE($3, items_updated)),
                errors_count = GREATEST(errors_count, COALESCE($4, errors_count)),
                last_heartbeat_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND lifecycle_status NOT IN ('finished_success', 'finished_failed')
            "#,
        )
        .bind(id)
        .bind(pages_processed)
        .bind(items_updated)
        .bind(errors_count)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn record_heartbeat(id: i64, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE parsing_sessions SET last_heartbeat_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn record_pid(id: i64, pid: i32, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE parsing_sessions SET pid = $2, last_heartbeat_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(pid)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_collect_stats(
        id: i64,
        stats: &serde_json::Value,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE parsing_sessions SET collect_stats_json = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(stats)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_parse_stats(id: i64, stats: &serde_json::Value, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE parsing_sessions SET parse_stats_json = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(stats)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> ParsingSession {
        let now = Utc::now();
        ParsingSession {
            id: 1,
            supplier_name: "acme".to_string(),
            session_run_id: Uuid::new_v4(),
            lifecycle_status: Lifecycle::Created,
            status: SessionStatus::Pending,
            run_mode: RunMode::Full,
            total_urls: 0,
            pages_processed: 0,
            items_updated: 0,
            errors_count: 0,
            collect_urls_count: None,
            collect_started_at: None,
            collect_finished_at: None,
            reset_started_at: None,
            reset_finished_at: None,
            parse_started_at: None,
            parse_finished_at: None,
            finished_at: None,
            pid: None,
            last_heartbeat_at: None,
            job_dispatched_at: None,
            stop_reason: None,
            error_message: None,
            collect_stats_json: None,
            parse_stats_json: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn fresh_session_can_start_collect() {
        let session = sample_session();
        assert!(session.can_start_collect());
        assert!(!session.has_collect_executed());
        assert!(session.can_dispatch_job());
    }

    #[test]
    fn collect_executed_once_started_regardless_of_outcome() {
        let mut session = sample_session();
        session.collect_started_at = Some(Utc::now());
        session.lifecycle_status = Lifecycle::Collecting;
        assert!(session.has_collect_executed());
        assert!(!session.can_start_collect());

        // Still counts as executed after a failure.
        session.lifecycle_status = Lifecycle::FinishedFailed;
        assert!(session.has_collect_executed());
    }

    #[test]
    fn needs_reset_only_in_collected() {
        let mut session = sample_session();
        assert!(!session.needs_reset());
        session.lifecycle_status = Lifecycle::Collected;
        assert!(session.needs_reset());
        session.lifecycle_status = Lifecycle::ReadyToParse;
        assert!(!session.needs_reset());
    }

    #[test]
    fn parsing_guards() {
        let mut session = sample_session();
        session.lifecycle_status = Lifecycle::ReadyToParse;
        assert!(session.can_start_parsing());

        session.parse_started_at = Some(Utc::now());
        session.lifecycle_status = Lifecycle::Parsing;
        assert!(session.has_parsing_started());
        assert!(!session.can_start_parsing());
    }

    #[test]
    fn terminal_states_absorb() {
        let mut session = sample_session();
        session.lifecycle_status = Lifecycle::FinishedSuccess;
        assert!(session.is_terminal());
        assert!(!session.can_dispatch_job());

        session.lifecycle_status = Lifecycle::FinishedFailed;
        assert!(session.is_terminal());
    }

    #[test]
    fn legacy_coarse_status_counts_as_terminal() {
        let mut session = sample_session();
        session.status = SessionStatus::Failed;
        assert!(session.is_terminal());

        session.status = SessionStatus::Completed;
        assert!(session.is_terminal());
    }

    #[test]
    fn dispatch_guard_blocks_second_chain() {
        let mut session = sample_session();
        session.job_dispatched_at = Some(Utc::now());
        assert!(!session.can_dispatch_job());
    }

    #[test]
    fn canceling_is_not_terminal() {
        let mut session = sample_session();
        session.status = SessionStatus::Canceling;
        assert!(session.is_canceling());
        assert!(!session.is_terminal());
    }
}
