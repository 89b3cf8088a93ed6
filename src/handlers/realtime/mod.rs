//! Realtime relay WebSocket handler
//!
//! Clients speak the upstream realtime protocol directly. The relay forwards
//! every frame in both directions and only intervenes to:
//!
//! - enforce server-side session settings on `session.update`
//! - hide tool calls from the client and run them server-side
//! - continue the conversation after server-side tool results
//! - surface client-destined tool results as
//!   `extension.middle_tier_tool_response`

mod handler;

pub use handler::realtime_handler;
