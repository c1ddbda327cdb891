//! Callback ingestion endpoint.
//!
//! The running scraper subprocess posts structured events here. Order of
//! checks matters: authentication first (never touches session state),
//! then session resolution, then the dedup guard, then the handler. Every
//! successful response carries the stop command when the session is being
//! canceled — this is the only channel by which the subprocess learns to
//! terminate.

mod auth;
mod dedup;
mod events;
mod handlers;

pub use auth::{legacy_session_token, verify_token};
pub use dedup::EventDedup;
pub use events::{CallbackEnvelope, CallbackEvent, CallbackResponse, ScrapePhase};
pub use handlers::{apply_event, map_finish_status, FinishOutcome};

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, error, warn};

use crate::domains::scraping::models::{ParsingSession, SessionStatus};
use crate::kernel::ServerDeps;

#[derive(Clone)]
pub struct CallbackState {
    pub deps: Arc<ServerDeps>,
    pub dedup: Arc<EventDedup>,
}

pub fn router(state: CallbackState) -> Router {
    Router::new()
        .route("/api/scraper/callback", post(handle_callback))
        .with_state(state)
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    // Decode the envelope ourselves so malformed payloads get a 422 with
    // field context instead of a bare rejection.
    let envelope: CallbackEnvelope = match serde_json::from_value(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "Rejected malformed callback payload");
            return validation_error("body", &e.to_string());
        }
    };

    let pool = &state.deps.db_pool;
    let secret = &state.deps.scraper.callback_token;

    if !auth::verify_token(&envelope.token, secret, envelope.session_id) {
        warn!(session_id = envelope.session_id, "Callback authentication failed");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"success": false, "error": "invalid token"})),
        )
            .into_response();
    }

    let session = match ParsingSession::find_by_id(envelope.session_id, pool).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return validation_error("session_id", "unknown session");
        }
        Err(e) => {
            error!(session_id = envelope.session_id, error = %e, "Failed to load session");
            return internal_error();
        }
    };

    // At-most-once: a redelivered event succeeds without reprocessing.
    if state
        .dedup
        .check_and_record(envelope.session_id, &envelope.event_id)
    {
        debug!(
            session_id = envelope.session_id,
            event_id = %envelope.event_id,
            "Duplicate callback event, skipping"
        );
        return Json(CallbackResponse::ok(session.is_canceling())).into_response();
    }

    debug!(
        session_id = session.id,
        event_id = %envelope.event_id,
        kind = envelope.event.kind(),
        "Applying callback event"
    );

    let outcome = match apply_event(&session, envelope.event, pool).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(session_id = session.id, error = %e, "Callback handler failed");
            return internal_error();
        }
    };

    // The stop command reflects the status at response time, which the
    // event we just applied may have changed.
    let stop = match ParsingSession::find_by_id(session.id, pool).await {
        Ok(Some(fresh)) => fresh.status == SessionStatus::Canceling,
        _ => session.is_canceling(),
    };

    if outcome.deferred {
        Json(CallbackResponse::deferred(stop)).into_response()
    } else {
        Json(CallbackResponse::ok(stop)).into_response()
    }
}

fn validation_error(field: &str, message: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({
            "success": false,
            "errors": { field: message }
        })),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"success": false, "error": "internal error"})),
    )
        .into_response()
}
