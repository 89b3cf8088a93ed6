pub mod api;
pub mod realtime;

use axum::{Router, middleware};
use std::sync::Arc;

use crate::middleware::{auth_middleware, connection_limit_middleware};
use crate::state::AppState;

/// Assemble the application routes with their middleware.
///
/// Layer order on the realtime route (outer to inner):
/// connection_limit -> auth -> handler.
pub fn create_app_router(state: Arc<AppState>) -> Router {
    let realtime_routes = realtime::create_realtime_router()
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            connection_limit_middleware,
        ));

    api::create_public_router()
        .merge(realtime_routes)
        .with_state(state)
}
