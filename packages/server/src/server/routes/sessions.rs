//! Operator endpoints: start a scan, cancel a session, read its status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::domains::scraping::jobs::start_full_scan;
use crate::domains::scraping::models::{ParsingSession, SupplierUrl};
use crate::kernel::ServerDeps;

pub fn router(deps: Arc<ServerDeps>) -> Router {
    Router::new()
        .route("/api/suppliers/:supplier/scan", post(start_scan_handler))
        .route("/api/sessions/:id/cancel", post(cancel_session_handler))
        .route("/api/sessions/:id", get(session_status_handler))
        .with_state(deps)
}

#[derive(Debug, Default, Deserialize)]
struct StartScanBody {
    #[serde(default)]
    collect_only: bool,
}

async fn start_scan_handler(
    State(deps): State<Arc<ServerDeps>>,
    Path(supplier): Path<String>,
    body: Option<Json<StartScanBody>>,
) -> Response {
    let collect_only = body.map(|Json(b)| b.collect_only).unwrap_or(false);
    match start_full_scan(&supplier, collect_only, &deps).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            error!(supplier = %supplier, error = %e, "Failed to start scan");
            internal_error()
        }
    }
}

async fn cancel_session_handler(
    State(deps): State<Arc<ServerDeps>>,
    Path(id): Path<i64>,
) -> Response {
    match ParsingSession::request_cancel(id, &deps.db_pool).await {
        Ok(true) => Json(json!({"success": true})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "no active session"})),
        )
            .into_response(),
        Err(e) => {
            error!(session_id = id, error = %e, "Failed to cancel session");
            internal_error()
        }
    }
}

async fn session_status_handler(
    State(deps): State<Arc<ServerDeps>>,
    Path(id): Path<i64>,
) -> Response {
    let pool = &deps.db_pool;
    let session = match ParsingSession::find_by_id(id, pool).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "unknown session"})),
            )
                .into_response();
        }
        Err(e) => {
            error!(session_id = id, error = %e, "Failed to load session");
            return internal_error();
        }
    };

    let claimable = SupplierUrl::claimable_count(&session.supplier_name, pool)
        .await
        .unwrap_or(0);
    let (blocked, total) = SupplierUrl::blocked_stats(&session.supplier_name, pool)
        .await
        .unwrap_or((0, 0));

    // A running session whose subprocess stopped reporting is stalled.
    let stalled = !session.is_terminal()
        && session.last_heartbeat_at.is_some_and(|at| {
            let age = chrono::Utc::now().signed_duration_since(at);
            age.num_seconds() > deps.scraper.heartbeat_timeout_secs as i64
        });

    Json(json!({
        "session": session,
        "stalled": stalled,
        "queue": {
            "claimable": claimable,
            "blocked": blocked,
            "total": total,
        }
    }))
    .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
        .into_response()
}
