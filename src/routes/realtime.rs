//! Realtime WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::realtime_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the Realtime WebSocket router
///
/// # Endpoint
///
/// `GET /realtime` - WebSocket upgrade relayed to the upstream realtime service
///
/// # Protocol
///
/// Messages are the upstream service's JSON events, passed through unchanged
/// except that:
/// - `session.update` has instructions, tools and other fixed settings
///   replaced by the server
/// - tool-call events are never shown to the client
/// - results of client-facing tools arrive as
///   `{"type": "extension.middle_tier_tool_response", ...}`
///
/// # Authentication
///
/// Uses the auth middleware; browsers can pass `?token=<secret>`.
pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/realtime", get(realtime_handler))
        .layer(TraceLayer::new_for_http())
}
