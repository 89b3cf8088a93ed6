//! Realtime protocol relay.
//!
//! One relay instance pairs an accepted client socket with a socket to the
//! upstream realtime service:
//!
//! - [`DuplexForwarder`] moves frames between the two sockets through
//!   bounded queues and knows nothing about the protocol
//! - [`SessionProcessor`] supplies the per-direction transforms that enforce
//!   session settings, hide tool calls and run tools
//! - [`message_type`] and [`RealtimeEnvelope`] let the processor route
//!   cheaply and parse only the messages it rewrites
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_relay::core::realtime::{
//!     DuplexForwarder, Leg, RelayDefaults, SessionProcessor, ToolRegistry,
//! };
//!
//! let processor = Arc::new(SessionProcessor::new(
//!     Arc::new(ToolRegistry::new()),
//!     Arc::new(RelayDefaults::default()),
//! ));
//! let exit = DuplexForwarder::default()
//!     .run(
//!         Leg::split(client_socket),
//!         processor.client_transform(),
//!         Leg::split(upstream_socket),
//!         processor.upstream_transform(),
//!         cancel,
//!     )
//!     .await;
//! ```

mod buffer;
mod envelope;
mod error;
mod forwarder;
mod processor;
mod sniffer;
mod tools;
mod upstream;

pub use buffer::{FrameEvent, FrameKind, MessageBuffer, RelayFrame};
pub use envelope::{RealtimeEnvelope, event};
pub use error::{RelayError, RelayResult};
pub use forwarder::{
    DEFAULT_CHANNEL_CAPACITY, DuplexForwarder, Leg, MessageTransform, ProcessorResult, Pump,
    PumpExit, RelayExit, passthrough,
};
pub use processor::{DEFAULT_INSTRUCTIONS, RelayDefaults, SessionProcessor, SessionState};
pub use sniffer::message_type;
pub use tools::{Tool, ToolDestination, ToolError, ToolInvoker, ToolRegistry};
pub use upstream::{
    DEFAULT_API_VERSION, REALTIME_PATH, REQUEST_ID_HEADER, UpstreamConnector, UpstreamSocket,
    realtime_url,
};
