//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `realtime` - Realtime relay WebSocket

pub mod api;
pub mod realtime;

pub use realtime::realtime_handler;
