pub mod config;
pub mod error;
mod health;
mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use relay_core::RelayCore;
use tower_http::trace::TraceLayer;

/// Builds the application router: the two WebSocket endpoints and the
/// health check, all sharing one `RelayCore`.
pub fn build_router(core: Arc<RelayCore>) -> Router {
    Router::new()
        .route("/ws/device/:device_id", get(ws::device_ws_handler))
        .route("/ws/client/:client_id", get(ws::client_ws_handler))
        .route("/health", get(health::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}
