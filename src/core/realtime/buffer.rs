//! Owned, transport-ready message frames.
//!
//! A [`MessageBuffer`] holds exactly one complete framed message in its raw
//! wire encoding. Ownership moves from a receive pump to a transform callback
//! and from there to a send pump; no two pumps hold the same buffer.
//!
//! Transports reassemble fragmented frames before handing them out, so a
//! buffer is always a whole message. The [`RelayFrame`] trait adapts each
//! transport's native message type (axum on the client leg, tungstenite on
//! the upstream leg) to and from `MessageBuffer`.

use bytes::Bytes;
use serde_json::Value;

/// Wire framing of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// One complete framed message in its raw encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBuffer {
    kind: FrameKind,
    bytes: Bytes,
}

impl MessageBuffer {
    /// Create a text frame.
    pub fn text(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Text,
            bytes: bytes.into(),
        }
    }

    /// Create a binary frame.
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Binary,
            bytes: bytes.into(),
        }
    }

    /// Encode a JSON document as a text frame.
    pub fn from_json(value: &Value) -> Self {
        Self::text(value.to_string())
    }

    /// Replace the contents with a re-encoded JSON document, keeping the frame kind.
    pub fn rewrite_json(&mut self, value: &Value) {
        self.bytes = Bytes::from(value.to_string());
    }

    #[inline]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// What a receive pump should do with one transport frame.
#[derive(Debug)]
pub enum FrameEvent {
    /// A data frame to hand to the transform callback.
    Message(MessageBuffer),
    /// The peer closed the connection.
    Close,
    /// A control frame the transport already handled.
    Skip,
}

/// Conversion between a transport's native frame type and [`MessageBuffer`].
pub trait RelayFrame: Sized + Send + 'static {
    /// Classify an inbound frame.
    fn into_event(self) -> FrameEvent;

    /// Build an outbound frame.
    fn from_buffer(buffer: MessageBuffer) -> Self;
}

fn utf8_or_binary(buffer: MessageBuffer) -> Result<String, Bytes> {
    let bytes = buffer.into_bytes();
    match std::str::from_utf8(&bytes) {
        Ok(text) => Ok(text.to_owned()),
        Err(_) => Err(bytes),
    }
}

impl RelayFrame for axum::extract::ws::Message {
    fn into_event(self) -> FrameEvent {
        use axum::extract::ws::Message;

        match self {
            Message::Text(text) => {
                FrameEvent::Message(MessageBuffer::text(text.as_str().to_owned()))
            }
            Message::Binary(data) => FrameEvent::Message(MessageBuffer::binary(data)),
            Message::Close(_) => FrameEvent::Close,
            Message::Ping(_) | Message::Pong(_) => FrameEvent::Skip,
        }
    }

    fn from_buffer(buffer: MessageBuffer) -> Self {
        use axum::extract::ws::Message;

        match buffer.kind() {
            FrameKind::Binary => Message::Binary(buffer.into_bytes()),
            FrameKind::Text => match utf8_or_binary(buffer) {
                Ok(text) => Message::Text(text.into()),
                Err(bytes) => Message::Binary(bytes),
            },
        }
    }
}

impl RelayFrame for tokio_tungstenite::tungstenite::Message {
    fn into_event(self) -> FrameEvent {
        use tokio_tungstenite::tungstenite::Message;

        match self {
            Message::Text(text) => {
                FrameEvent::Message(MessageBuffer::text(text.as_str().to_owned()))
            }
            Message::Binary(data) => FrameEvent::Message(MessageBuffer::binary(data)),
            Message::Close(_) => FrameEvent::Close,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => FrameEvent::Skip,
        }
    }

    fn from_buffer(buffer: MessageBuffer) -> Self {
        use tokio_tungstenite::tungstenite::Message;

        match buffer.kind() {
            FrameKind::Binary => Message::Binary(buffer.into_bytes()),
            FrameKind::Text => match utf8_or_binary(buffer) {
                Ok(text) => Message::Text(text.into()),
                Err(bytes) => Message::Binary(bytes),
            },
        }
    }
}
