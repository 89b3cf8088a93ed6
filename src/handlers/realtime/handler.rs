//! Realtime WebSocket handler
//!
//! Each accepted upgrade opens one authenticated upstream socket and runs one
//! relay instance between the two until either side stops.

use axum::{
    Extension,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::HeaderMap,
    response::Response,
};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::auth::Auth;
use crate::core::realtime::{
    DuplexForwarder, Leg, PumpExit, REQUEST_ID_HEADER, RelayError, SessionProcessor,
};
use crate::errors::app_error::{AppError, AppResult};
use crate::middleware::ClientIp;
use crate::state::{AppState, ConnectionGuard};

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Realtime WebSocket handler
///
/// Upgrades the HTTP connection to WebSocket and relays it to the upstream
/// realtime service. An inbound `x-ms-client-request-id` header is passed on
/// to the upstream handshake.
///
/// # Arguments
/// * `ws` - The WebSocket upgrade request from Axum
/// * `state` - Application state containing configuration
/// * `auth` - Auth context from middleware
/// * `client_ip` - Connection slot taken by the connection limit middleware
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<Auth>,
    client_ip: Option<Extension<ClientIp>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    if state.shutdown.is_cancelled() {
        return Err(AppError::ServiceUnavailable(
            "Server is shutting down".to_string(),
        ));
    }

    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    info!(
        auth_id = ?auth.id,
        request_id = ?request_id,
        "Realtime WebSocket connection upgrade requested"
    );

    // Owned by the upgrade callback so the slot is released even if the
    // upgrade never completes.
    let guard = client_ip.map(|Extension(ClientIp(ip))| ConnectionGuard::new(state.clone(), ip));

    Ok(ws
        .max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_realtime_socket(socket, state, auth, request_id, guard)))
}

/// Run one relay instance for an upgraded client socket
async fn handle_realtime_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    auth: Auth,
    request_id: Option<String>,
    _guard: Option<ConnectionGuard>,
) {
    let connection_id = Uuid::new_v4();
    let span = info_span!(
        "relay",
        connection_id = %connection_id,
        auth_id = ?auth.id
    );

    relay(socket, state, request_id).instrument(span).await
}

async fn relay(mut socket: WebSocket, state: Arc<AppState>, request_id: Option<String>) {
    info!("Realtime WebSocket connection established");

    let upstream = match state.upstream.connect(request_id.as_deref()).await {
        Ok(upstream) => upstream,
        Err(e) => {
            match &e {
                RelayError::AuthenticationFailed(_) => {
                    error!(error = %e, "Upstream rejected relay credentials")
                }
                _ => error!(error = %e, "Failed to connect to upstream realtime service"),
            }
            let close = Message::Close(Some(CloseFrame {
                code: close_code::ERROR,
                reason: "Upstream connection failed".into(),
            }));
            if let Err(e) = socket.send(close).await {
                warn!(error = %e, "Failed to send close frame to client");
            }
            return;
        }
    };

    let processor = Arc::new(SessionProcessor::new(
        state.tools.clone(),
        state.relay_defaults.clone(),
    ));
    let forwarder = DuplexForwarder::new(state.config.relay_channel_capacity);

    let exit = forwarder
        .run(
            Leg::split(socket),
            processor.client_transform(),
            Leg::split(upstream),
            processor.upstream_transform(),
            state.shutdown.child_token(),
        )
        .await;

    match exit.exit {
        PumpExit::Failed(ref reason) => {
            warn!(pump = %exit.pump, reason = %reason, "Realtime relay ended with a transport error")
        }
        _ => info!(pump = %exit.pump, exit = %exit.exit, "Realtime relay ended"),
    }
}
