//! Application setup and server configuration.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::domains::scraping::callback::{self, CallbackState, EventDedup};
use crate::kernel::ServerDeps;
use crate::server::routes::{health_handler, sessions};

/// Build the Axum application router.
///
/// The callback endpoint and the operator routes share the same deps; the
/// callback additionally owns the event dedup cache.
pub fn build_app(deps: Arc<ServerDeps>) -> Router {
    let callback_state = CallbackState {
        deps: deps.clone(),
        dedup: Arc::new(EventDedup::with_default_ttl()),
    };

    Router::new()
        .route("/health", get(health_handler))
        .merge(callback::router(callback_state))
        .merge(sessions::router(deps))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
