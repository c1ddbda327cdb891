//! Per-event callback handlers.
//!
//! Each handler takes the session the envelope named and applies one event
//! against it. Phase transitions stay idempotent (conditional on the current
//! lifecycle) and counters stay monotonic, because these handlers run
//! concurrently with the phase jobs.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::domains::scraping::models::{
    NewLogEntry, ParsingSession, RunMode, SessionLog, SupplierUrl,
};
use crate::domains::scraping::stop_reason;

use super::events::{
    CallbackEvent, FinishPayload, LogPayload, MarkUrlFailedPayload, PhaseFinishedPayload,
    PhaseProgressPayload, PhaseStartedPayload, ProgressPayload, ScrapePhase, TotalUrlsPayload,
};

/// What applying an event did, beyond plain success.
#[derive(Debug, Default)]
pub struct EventOutcome {
    /// `finish` arrived while claimable work remained; stats were stored but
    /// the session was not finalized.
    pub deferred: bool,
}

/// Validated terminal outcome reported by the subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    Success,
    Partial,
    Failed,
}

/// Map the legacy status vocabulary onto the canonical outcome: synonyms
/// first (`completed`/`ok` → success), then an allow-list with `failed` as
/// the default for anything unrecognized.
pub fn map_finish_status(raw: Option<&str>) -> FinishOutcome {
    let normalized = raw.unwrap_or("").trim().to_ascii_lowercase();
    match normalized.as_str() {
        "success" | "completed" | "ok" => FinishOutcome::Success,
        "partial" => FinishOutcome::Partial,
        _ => FinishOutcome::Failed,
    }
}

pub async fn apply_event(
    session: &ParsingSession,
    event: CallbackEvent,
    pool: &PgPool,
) -> Result<EventOutcome> {
    match event {
        CallbackEvent::Log(payload) => handle_log(session, payload, pool).await,
        CallbackEvent::Progress(payload) => handle_progress(session, payload, pool).await,
        CallbackEvent::TotalUrls(payload) => handle_total_urls(session, payload, pool).await,
        CallbackEvent::MarkUrlFailed(payload) => {
            handle_mark_url_failed(session, payload, pool).await
        }
        CallbackEvent::Finish(payload) => handle_finish(session, payload, pool).await,
        CallbackEvent::PhaseStarted(payload) => handle_phase_started(session, payload, pool).await,
        CallbackEvent::PhaseProgress(payload) => {
            handle_phase_progress(session, payload, pool).await
        }
        CallbackEvent::PhaseFinished(payload) => {
            handle_phase_finished(session, payload, pool).await
        }
    }
}

async fn handle_log(
    session: &ParsingSession,
    payload: LogPayload,
    pool: &PgPool,
) -> Result<EventOutcome> {
    let entries: Vec<NewLogEntry> = match payload {
        LogPayload::Single(entry) => vec![NewLogEntry {
            level: entry.level,
            message: entry.message,
            details: entry.details,
        }],
        LogPayload::Batch { entries } => entries
            .into_iter()
            .map(|entry| NewLogEntry {
                level: entry.level,
                message: entry.message,
                details: entry.details,
            })
            .collect(),
    };
    SessionLog::insert_batch(session.id, &entries, pool).await?;
    Ok(EventOutcome::default())
}

async fn handle_progress(
    session: &ParsingSession,
    payload: ProgressPayload,
    pool: &PgPool,
) -> Result<EventOutcome> {
    ParsingSession::apply_progress(session.id, payload.pages_processed, payload.total_urls, pool)
        .await?;
    Ok(EventOutcome::default())
}

async fn handle_total_urls(
    session: &ParsingSession,
    payload: TotalUrlsPayload,
    pool: &PgPool,
) -> Result<EventOutcome> {
    ParsingSession::raise_total_urls(session.id, payload.total_urls, pool).await?;
    Ok(EventOutcome::default())
}

async fn handle_mark_url_failed(
    session: &ParsingSession,
    payload: MarkUrlFailedPayload,
    pool: &PgPool,
) -> Result<EventOutcome> {
    let blocked =
        SupplierUrl::is_blocking_signal(payload.error_code.as_deref(), payload.http_status);
    let updated = if blocked {
        SupplierUrl::mark_blocked(
            &session.supplier_name,
            &payload.url,
            payload.error_code.as_deref(),
            payload.message.as_deref(),
            pool,
        )
        .await?
    } else {
        SupplierUrl::mark_failed(
            &session.supplier_name,
            &payload.url,
            payload.error_code.as_deref(),
            payload.message.as_deref(),
            pool,
        )
        .await?
    };

    if !updated {
        warn!(
            session_id = session.id,
            url = %payload.url,
            "mark_url_failed for unknown URL"
        );
    }
    Ok(EventOutcome::default())
}

/// Legacy whole-run completion signal. If claimable work remains, the run is
/// clearly not over — store the stats and defer instead of closing the
/// session prematurely.
async fn handle_finish(
    session: &ParsingSession,
    payload: FinishPayload,
    pool: &PgPool,
) -> Result<EventOutcome> {
    if session.is_terminal() {
        return Ok(EventOutcome::default());
    }

    if let Some(stats) = &payload.stats {
        ParsingSession::set_parse_stats(session.id, stats, pool).await?;
    }

    let claimable = SupplierUrl::claimable_count(&session.supplier_name, pool).await?;
    if claimable > 0 {
        info!(
            session_id = session.id,
            claimable, "finish received with claimable work remaining, deferring"
        );
        return Ok(EventOutcome { deferred: true });
    }

    finalize_session(session, map_finish_status(payload.status.as_deref()), pool).await?;
    Ok(EventOutcome::default())
}

async fn handle_phase_started(
    session: &ParsingSession,
    payload: PhaseStartedPayload,
    pool: &PgPool,
) -> Result<EventOutcome> {
    if session.is_terminal() {
        return Ok(EventOutcome::default());
    }
    info!(
        session_id = session.id,
        phase = ?payload.phase,
        pid = ?payload.pid,
        "Subprocess phase started"
    );
    match payload.pid {
        Some(pid) => ParsingSession::record_pid(session.id, pid, pool).await?,
        None => ParsingSession::record_heartbeat(session.id, pool).await?,
    }
    Ok(EventOutcome::default())
}

async fn handle_phase_progress(
    session: &ParsingSession,
    payload: PhaseProgressPayload,
    pool: &PgPool,
) -> Result<EventOutcome> {
    ParsingSession::bump_phase_counters(
        session.id,
        payload.pages_processed,
        payload.items_updated,
        payload.errors_count,
        pool,
    )
    .await?;
    Ok(EventOutcome::default())
}

async fn handle_phase_finished(
    session: &ParsingSession,
    payload: PhaseFinishedPayload,
    pool: &PgPool,
) -> Result<EventOutcome> {
    if session.is_terminal() {
        return Ok(EventOutcome::default());
    }
    info!(
        session_id = session.id,
        phase = ?payload.phase,
        status = ?payload.status,
        "Subprocess phase finished"
    );
    ParsingSession::record_heartbeat(session.id, pool).await?;

    match payload.phase {
        ScrapePhase::Collect => {
            if let Some(stats) = &payload.stats {
                ParsingSession::set_collect_stats(session.id, stats, pool).await?;

                // The collect job prefers these stats over a live row count.
                if let Some(count) = collected_count_from_stats(stats) {
                    ParsingSession::raise_total_urls(session.id, count, pool).await?;
                }
            }

            // Collect-only runs have no parse loop to finalize them.
            if session.run_mode == RunMode::CollectOnly {
                finalize_session(session, map_finish_status(payload.status.as_deref()), pool)
                    .await?;
            }
        }
        ScrapePhase::Parse => {
            if let Some(stats) = &payload.stats {
                ParsingSession::set_parse_stats(session.id, stats, pool).await?;
            }
        }
        ScrapePhase::Reset => {}
    }

    Ok(EventOutcome::default())
}

/// The canonical callback-side finalization path. Both the legacy `finish`
/// event and collect-only `phase_finished` land here.
async fn finalize_session(
    session: &ParsingSession,
    outcome: FinishOutcome,
    pool: &PgPool,
) -> Result<()> {
    match outcome {
        FinishOutcome::Success => {
            session.finalize_success(None, pool).await?;
        }
        FinishOutcome::Partial => {
            session
                .finalize_success(Some(stop_reason::PARTIAL), pool)
                .await?;
        }
        FinishOutcome::Failed => {
            session
                .fail(
                    stop_reason::REPORTED_FAILED,
                    "subprocess reported run as failed",
                    pool,
                )
                .await?;
        }
    }
    Ok(())
}

/// Collected count reported by the subprocess, preferring the sent total.
fn collected_count_from_stats(stats: &serde_json::Value) -> Option<i32> {
    stats
        .get("urls_sent_total")
        .and_then(|v| v.as_i64())
        .or_else(|| stats.get("urls_unique_total").and_then(|v| v.as_i64()))
        .map(|n| n as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_status_synonyms_map_to_success() {
        assert_eq!(map_finish_status(Some("success")), FinishOutcome::Success);
        assert_eq!(map_finish_status(Some("completed")), FinishOutcome::Success);
        assert_eq!(map_finish_status(Some("ok")), FinishOutcome::Success);
        assert_eq!(map_finish_status(Some("OK")), FinishOutcome::Success);
    }

    #[test]
    fn finish_status_partial_is_preserved() {
        assert_eq!(map_finish_status(Some("partial")), FinishOutcome::Partial);
    }

    #[test]
    fn unrecognized_finish_status_defaults_to_failed() {
        assert_eq!(map_finish_status(Some("weird")), FinishOutcome::Failed);
        assert_eq!(map_finish_status(Some("")), FinishOutcome::Failed);
        assert_eq!(map_finish_status(None), FinishOutcome::Failed);
    }

    #[test]
    fn collected_count_prefers_sent_total() {
        let stats = serde_json::json!({"urls_sent_total": 640, "urls_unique_total": 612});
        assert_eq!(collected_count_from_stats(&stats), Some(640));

        let unique_only = serde_json::json!({"urls_unique_total": 612});
        assert_eq!(collected_count_from_stats(&unique_only), Some(612));

        assert_eq!(collected_count_from_stats(&serde_json::json!({})), None);
    }
}
