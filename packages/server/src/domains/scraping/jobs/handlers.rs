//! Handlers for the phase chain.
//!
//! Every handler reloads its session and re-evaluates guards before doing
//! any work, so queue redelivery and worker crashes are safe: the external
//! side effect (the subprocess call) only happens after the guard passes.
//! Handlers return `Ok` even when the phase fails — the failure is already
//! recorded on the session and the chain simply stops. A returned `Err`
//! means the handler itself blew up (DB down, bug); the registered failure
//! hook then marks the session failed with `JOB_FAILED`.
//!
//! ## Pipeline flow
//!
//! ```text
//! StartFullScanJob → CollectUrlsJob → ResetUrlsJob → ParseBatchJob ⟳ → terminal
//! ```

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domains::scraping::models::{Lifecycle, ParsingSession, RunMode, SupplierUrl};
use crate::domains::scraping::{scraper, stop_reason};
use crate::kernel::jobs::JobRegistry;
use crate::kernel::process::ProcessError;
use crate::kernel::ServerDeps;

use super::{CollectUrlsJob, ParseBatchJob, ResetUrlsJob, StartFullScanJob};

/// Result of asking the orchestrator to start (or reuse) a scan.
#[derive(Debug, Clone, Serialize)]
pub struct StartScanOutcome {
    pub session_id: i64,
    pub dispatched: bool,
}

/// Orchestrator entrypoint: reuse the supplier's active session or create a
/// fresh one, then start the phase chain exactly once.
pub async fn start_full_scan(
    supplier_name: &str,
    collect_only: bool,
    deps: &ServerDeps,
) -> Result<StartScanOutcome> {
    let pool = &deps.db_pool;

    let session = match ParsingSession::find_active_for_supplier(supplier_name, pool).await? {
        Some(existing) => {
            info!(
                session_id = existing.id,
                supplier = supplier_name,
                "Reusing active session"
            );
            existing
        }
        None => {
            let run_mode = if collect_only {
                RunMode::CollectOnly
            } else {
                RunMode::Full
            };
            let created = ParsingSession::create(supplier_name, run_mode, pool).await?;
            info!(
                session_id = created.id,
                supplier = supplier_name,
                run_mode = ?run_mode,
                "Created parsing session"
            );
            created
        }
    };

    // Fail closed: this is the single chokepoint preventing duplicate
    // pipeline starts for one session.
    if !session.can_dispatch_job() {
        info!(
            session_id = session.id,
            supplier = supplier_name,
            "Phase chain already dispatched, skipping"
        );
        return Ok(StartScanOutcome {
            session_id: session.id,
            dispatched: false,
        });
    }
    if !session.mark_job_dispatched(pool).await? {
        info!(
            session_id = session.id,
            supplier = supplier_name,
            "Lost dispatch race, skipping"
        );
        return Ok(StartScanOutcome {
            session_id: session.id,
            dispatched: false,
        });
    }

    deps.jobs.enqueue(CollectUrlsJob::new(session.id)).await?;

    Ok(StartScanOutcome {
        session_id: session.id,
        dispatched: true,
    })
}

pub async fn handle_start_full_scan(job: StartFullScanJob, deps: Arc<ServerDeps>) -> Result<()> {
    start_full_scan(&job.supplier_name, job.collect_only, &deps).await?;
    Ok(())
}

pub async fn handle_collect_urls(job: CollectUrlsJob, deps: Arc<ServerDeps>) -> Result<()> {
    let pool = &deps.db_pool;
    let session = load_session(job.session_id, pool).await?;

    if session.is_terminal() {
        info!(session_id = session.id, "Session is terminal, skipping collect");
        return Ok(());
    }
    if session.is_canceling() {
        session
            .fail(stop_reason::CANCELED, "canceled before collect phase", pool)
            .await?;
        return Ok(());
    }
    if session.has_collect_executed() {
        // Idempotent re-entry: collect already ran, move the chain along.
        info!(
            session_id = session.id,
            "Collect already executed, dispatching reset"
        );
        deps.jobs.enqueue(ResetUrlsJob::new(session.id)).await?;
        return Ok(());
    }

    let Some(session) = session.start_collecting(pool).await? else {
        // Either a concurrent delivery just started collect, or the session
        // is in a state collect can never run from.
        let session = load_session(job.session_id, pool).await?;
        if session.has_collect_executed() || session.is_terminal() {
            info!(
                session_id = session.id,
                "Collect guard lost the race, skipping"
            );
        } else {
            session
                .fail(
                    stop_reason::INVALID_STATE_FOR_COLLECT,
                    &format!(
                        "expected lifecycle 'created', found '{:?}'",
                        session.lifecycle_status
                    ),
                    pool,
                )
                .await?;
        }
        return Ok(());
    };

    info!(
        session_id = session.id,
        supplier = %session.supplier_name,
        "Starting collect phase"
    );

    let spec = scraper::collect_command(&deps.scraper, &session);
    let (output_tx, heartbeat) = spawn_heartbeat(session.id, pool.clone());
    let result = deps
        .process
        .run(spec, deps.scraper.collect_timeout(), Some(output_tx))
        .await;
    let _ = heartbeat.await;

    match result {
        Ok(output) if output.success() => {
            // The subprocess may have reported structured stats via the
            // callback while we were waiting; reload before counting.
            let session = load_session(session.id, pool).await?;
            let count = collected_url_count(&session, pool).await?;

            match session.mark_collecting_done(count, pool).await? {
                Some(session) => {
                    info!(
                        session_id = session.id,
                        urls_count = count,
                        "Collect phase done, dispatching reset"
                    );
                    deps.jobs.enqueue(ResetUrlsJob::new(session.id)).await?;
                }
                None => {
                    info!(
                        session_id = session.id,
                        "Session moved past collecting, not re-marking"
                    );
                }
            }
        }
        Ok(output) => {
            warn!(
                session_id = session.id,
                exit_code = output.exit_code,
                "Collect subprocess failed"
            );
            session
                .fail_with_process_error(
                    stop_reason::COLLECT_FAILED,
                    Some(output.exit_code),
                    &output.stderr,
                    pool,
                )
                .await?;
        }
        Err(ProcessError::TimedOut { after, stderr }) => {
            warn!(session_id = session.id, timeout = ?after, "Collect subprocess timed out");
            session
                .fail_with_process_error(stop_reason::COLLECT_TIMEOUT, None, &stderr, pool)
                .await?;
        }
        Err(e) => {
            session
                .fail(stop_reason::COLLECT_EXCEPTION, &e.to_string(), pool)
                .await?;
        }
    }

    Ok(())
}

pub async fn handle_reset_urls(job: ResetUrlsJob, deps: Arc<ServerDeps>) -> Result<()> {
    let pool = &deps.db_pool;
    let session = load_session(job.session_id, pool).await?;

    if session.is_terminal() {
        info!(session_id = session.id, "Session is terminal, skipping reset");
        return Ok(());
    }
    if matches!(
        session.lifecycle_status,
        Lifecycle::ReadyToParse | Lifecycle::Parsing
    ) {
        // Idempotent re-entry: reset already completed on a prior delivery.
        info!(
            session_id = session.id,
            "Reset already done, dispatching parse"
        );
        deps.jobs.enqueue(ParseBatchJob::first(session.id)).await?;
        return Ok(());
    }
    if session.is_canceling() {
        session
            .fail(stop_reason::CANCELED, "canceled before reset phase", pool)
            .await?;
        return Ok(());
    }
    if !session.needs_reset() {
        session
            .fail(
                stop_reason::INVALID_STATE_FOR_RESET,
                &format!(
                    "expected lifecycle 'collected', found '{:?}'",
                    session.lifecycle_status
                ),
                pool,
            )
            .await?;
        return Ok(());
    }

    let Some(session) = session.start_resetting(pool).await? else {
        info!(
            session_id = job.session_id,
            "Reset guard lost the race, skipping"
        );
        return Ok(());
    };

    info!(
        session_id = session.id,
        supplier = %session.supplier_name,
        "Starting reset phase"
    );

    let spec = scraper::reset_command(&deps.scraper, &session);
    let (output_tx, heartbeat) = spawn_heartbeat(session.id, pool.clone());
    let result = deps
        .process
        .run(spec, deps.scraper.reset_timeout(), Some(output_tx))
        .await;
    let _ = heartbeat.await;

    match result {
        Ok(output) if output.success() => {
            let claimable = SupplierUrl::claimable_count(&session.supplier_name, pool).await?;
            if claimable == 0 {
                // A reset that produces no work is evidence of a bug, not a
                // legitimately finished run.
                warn!(
                    session_id = session.id,
                    "Reset reported success but left no claimable URLs"
                );
                session
                    .fail(
                        stop_reason::NO_PENDING_AFTER_RESET,
                        "reset succeeded but no claimable URLs remain",
                        pool,
                    )
                    .await?;
                return Ok(());
            }

            match session.mark_reset_done(pool).await? {
                Some(session) => {
                    info!(
                        session_id = session.id,
                        claimable, "Reset phase done, dispatching parse"
                    );
                    deps.jobs.enqueue(ParseBatchJob::first(session.id)).await?;
                }
                None => {
                    info!(
                        session_id = session.id,
                        "Session moved past resetting, not re-marking"
                    );
                }
            }
        }
        Ok(output) => {
            session
                .fail_with_process_error(
                    stop_reason::RESET_FAILED,
                    Some(output.exit_code),
                    &output.stderr,
                    pool,
                )
                .await?;
        }
        Err(ProcessError::TimedOut { after, stderr }) => {
            warn!(session_id = session.id, timeout = ?after, "Reset subprocess timed out");
            session
                .fail_with_process_error(stop_reason::RESET_TIMEOUT, None, &stderr, pool)
                .await?;
        }
        Err(e) => {
            session
                .fail(stop_reason::RESET_EXCEPTION, &e.to_string(), pool)
                .await?;
        }
    }

    Ok(())
}

pub async fn handle_parse_batch(job: ParseBatchJob, deps: Arc<ServerDeps>) -> Result<()> {
    let pool = &deps.db_pool;
    let session = load_session(job.session_id, pool).await?;

    if session.is_terminal() {
        info!(session_id = session.id, "Session is terminal, skipping batch");
        return Ok(());
    }
    if session.is_canceling() {
        session
            .fail(stop_reason::CANCELED, "canceled during parse phase", pool)
            .await?;
        return Ok(());
    }

    // First batch promotes ready_to_parse → parsing; later batches require
    // parsing exactly. Anything else is a stray delivery for a session that
    // moved on, and acting on it would violate the lifecycle.
    let session = match session.lifecycle_status {
        Lifecycle::ReadyToParse => match session.start_parsing(pool).await? {
            Some(started) => started,
            None => load_session(job.session_id, pool).await?,
        },
        _ => session,
    };
    if session.lifecycle_status != Lifecycle::Parsing {
        info!(
            session_id = session.id,
            lifecycle = ?session.lifecycle_status,
            "Session is not parsing, ignoring stray batch job"
        );
        return Ok(());
    }

    // Safety valve: the claimable count reaching zero is the designed loop
    // exit, but a misbehaving queue must not dispatch forever.
    if job.batch_index >= deps.scraper.max_parse_batches {
        session
            .fail(
                stop_reason::PARSE_BATCH_FAILED,
                &format!(
                    "parse batch limit reached ({} batches)",
                    deps.scraper.max_parse_batches
                ),
                pool,
            )
            .await?;
        return Ok(());
    }

    // Circuit breaker: stop hammering a supplier that is blocking us.
    let (blocked, total) = SupplierUrl::blocked_stats(&session.supplier_name, pool).await?;
    if total > 0 && blocked as f64 / total as f64 >= deps.scraper.blocked_ratio_threshold {
        warn!(
            session_id = session.id,
            blocked, total, "Blocked ratio exceeded threshold"
        );
        session
            .fail(
                stop_reason::TOO_MANY_BLOCKED,
                &format!("{} of {} URLs blocked", blocked, total),
                pool,
            )
            .await?;
        return Ok(());
    }

    let claimable = SupplierUrl::claimable_count(&session.supplier_name, pool).await?;
    if claimable == 0 {
        info!(session_id = session.id, "No claimable URLs, parsing complete");
        session.mark_parsing_completed(pool).await?;
        return Ok(());
    }

    info!(
        session_id = session.id,
        batch_index = job.batch_index,
        claimable,
        "Starting parse batch"
    );

    let spec = scraper::parse_batch_command(&deps.scraper, &session);
    let (output_tx, heartbeat) = spawn_heartbeat(session.id, pool.clone());
    let result = deps
        .process
        .run(spec, deps.scraper.parse_batch_timeout(), Some(output_tx))
        .await;
    let _ = heartbeat.await;

    match result {
        Ok(output) if output.success() => {
            let remaining = SupplierUrl::claimable_count(&session.supplier_name, pool).await?;
            if remaining > 0 {
                info!(
                    session_id = session.id,
                    remaining, "Batch done, re-dispatching"
                );
                deps.jobs
                    .enqueue_in(job.next(), deps.scraper.parse_batch_delay())
                    .await?;
            } else {
                info!(session_id = session.id, "All URLs processed");
                session.mark_parsing_completed(pool).await?;
            }
        }
        Ok(output) => {
            session
                .fail_with_process_error(
                    stop_reason::PARSE_BATCH_FAILED,
                    Some(output.exit_code),
                    &output.stderr,
                    pool,
                )
                .await?;
        }
        Err(ProcessError::TimedOut { after, stderr }) => {
            warn!(session_id = session.id, timeout = ?after, "Parse batch timed out");
            session
                .fail_with_process_error(stop_reason::PARSE_TIMEOUT, None, &stderr, pool)
                .await?;
        }
        Err(e) => {
            session
                .fail(stop_reason::PARSE_EXCEPTION, &e.to_string(), pool)
                .await?;
        }
    }

    Ok(())
}

/// Register the phase jobs and their shared failure hook.
///
/// The hook is the queue-level catch-all: when a handler itself errors, the
/// session is marked failed (if not already terminal) and the chain stops.
/// Nothing is ever re-enqueued from here.
pub fn register_scraping_jobs(registry: &mut JobRegistry) {
    registry.register::<StartFullScanJob, _, _>(StartFullScanJob::JOB_TYPE, handle_start_full_scan);
    registry.register::<CollectUrlsJob, _, _>(CollectUrlsJob::JOB_TYPE, handle_collect_urls);
    registry.register::<ResetUrlsJob, _, _>(ResetUrlsJob::JOB_TYPE, handle_reset_urls);
    registry.register::<ParseBatchJob, _, _>(ParseBatchJob::JOB_TYPE, handle_parse_batch);

    for job_type in [
        StartFullScanJob::JOB_TYPE,
        CollectUrlsJob::JOB_TYPE,
        ResetUrlsJob::JOB_TYPE,
        ParseBatchJob::JOB_TYPE,
    ] {
        registry.on_failed(job_type, |job, deps, error| async move {
            let Some(session_id) = job.session_id else {
                return;
            };
            match ParsingSession::find_by_id(session_id, &deps.db_pool).await {
                Ok(Some(session)) if !session.is_terminal() => {
                    if let Err(e) = session
                        .fail(stop_reason::JOB_FAILED, &error, &deps.db_pool)
                        .await
                    {
                        warn!(session_id, error = %e, "Failed to mark session failed");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(session_id, error = %e, "Failed to load session in failure hook");
                }
            }
        });
    }
}

async fn load_session(session_id: i64, pool: &PgPool) -> Result<ParsingSession> {
    ParsingSession::find_by_id(session_id, pool)
        .await?
        .ok_or_else(|| anyhow!("parsing session {} not found", session_id))
}

/// Collected-URL count, in priority order: structured stats reported via
/// callback, the persisted counter, then a direct count of valid rows.
async fn collected_url_count(session: &ParsingSession, pool: &PgPool) -> Result<i32> {
    if let Some(stats) = &session.collect_stats_json {
        if let Some(n) = stats.get("urls_sent_total").and_then(|v| v.as_i64()) {
            return Ok(n as i32);
        }
    }
    if let Some(n) = session.collect_urls_count {
        if n > 0 {
            return Ok(n);
        }
    }
    let count = SupplierUrl::count_valid(&session.supplier_name, pool).await?;
    Ok(count as i32)
}

/// Heartbeat the session for every output line the subprocess produces.
fn spawn_heartbeat(session_id: i64, pool: PgPool) -> (UnboundedSender<String>, JoinHandle<()>) {
    let (tx, mut rx) = unbounded_channel::<String>();
    let handle = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            if let Err(e) = ParsingSession::record_heartbeat(session_id, &pool).await {
                warn!(session_id, error = %e, "Heartbeat update failed");
            }
        }
    });
    (tx, handle)
}
