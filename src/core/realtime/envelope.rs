//! Parsed view over a realtime protocol message.
//!
//! [`RealtimeEnvelope`] owns a `serde_json::Value` tree built from a
//! [`MessageBuffer`] and exposes the handful of fields the session processor
//! routes on. Edits go through targeted setters on the tree and are written
//! back with [`RealtimeEnvelope::write_into`]; the original buffer is never
//! modified by parsing.

use serde_json::{Map, Value};

use super::buffer::MessageBuffer;
use super::error::RelayResult;

/// Event and item type tags of the realtime protocol that the relay acts on.
pub mod event {
    pub const SESSION_UPDATE: &str = "session.update";
    pub const SESSION_CREATED: &str = "session.created";
    pub const RESPONSE_CREATE: &str = "response.create";
    pub const RESPONSE_DONE: &str = "response.done";
    pub const RESPONSE_OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
    pub const RESPONSE_OUTPUT_ITEM_DONE: &str = "response.output_item.done";
    pub const RESPONSE_FUNCTION_CALL_ARGUMENTS_DELTA: &str =
        "response.function_call_arguments.delta";
    pub const RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE: &str = "response.function_call_arguments.done";
    pub const CONVERSATION_ITEM_CREATE: &str = "conversation.item.create";
    pub const CONVERSATION_ITEM_CREATED: &str = "conversation.item.created";
    pub const MIDDLE_TIER_TOOL_RESPONSE: &str = "extension.middle_tier_tool_response";

    pub const ITEM_FUNCTION_CALL: &str = "function_call";
    pub const ITEM_FUNCTION_CALL_OUTPUT: &str = "function_call_output";
}

/// A fully parsed realtime message.
#[derive(Debug, Clone)]
pub struct RealtimeEnvelope {
    root: Value,
}

impl RealtimeEnvelope {
    /// Parse a complete message buffer.
    pub fn parse(buffer: &MessageBuffer) -> RelayResult<Self> {
        let root = serde_json::from_slice(buffer.as_bytes())?;
        Ok(Self { root })
    }

    /// Top-level `type`, or `""` when absent.
    pub fn message_type(&self) -> &str {
        self.root.get("type").and_then(Value::as_str).unwrap_or("")
    }

    fn item(&self) -> Option<&Value> {
        self.root.get("item")
    }

    fn item_str(&self, field: &str) -> Option<&str> {
        self.item()?.get(field)?.as_str()
    }

    /// `item.type`, if present.
    pub fn item_type(&self) -> Option<&str> {
        self.item_str("type")
    }

    /// `item.call_id` of a `function_call` item.
    pub fn tool_call_id(&self) -> Option<&str> {
        self.function_call_field("call_id")
    }

    /// `item.name` of a `function_call` item.
    pub fn tool_name(&self) -> Option<&str> {
        self.function_call_field("name")
    }

    /// `item.arguments` of a `function_call` item.
    pub fn tool_arguments(&self) -> Option<&str> {
        self.function_call_field("arguments")
    }

    fn function_call_field(&self, field: &str) -> Option<&str> {
        if self.item_type() != Some(event::ITEM_FUNCTION_CALL) {
            return None;
        }
        self.item_str(field)
    }

    /// Mutable access to the `session` object, if the message carries one.
    pub fn session_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.root.get_mut("session")?.as_object_mut()
    }

    /// Remove every `function_call` entry from `response.output`.
    ///
    /// Returns `true` when at least one entry was removed.
    pub fn trim_tool_calls(&mut self) -> bool {
        let Some(output) = self
            .root
            .get_mut("response")
            .and_then(|response| response.get_mut("output"))
            .and_then(Value::as_array_mut)
        else {
            return false;
        };

        let before = output.len();
        output.retain(|entry| {
            entry.get("type").and_then(Value::as_str) != Some(event::ITEM_FUNCTION_CALL)
        });
        output.len() != before
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Re-encode into an existing buffer, keeping its frame kind.
    pub fn write_into(&self, buffer: &mut MessageBuffer) {
        buffer.rewrite_json(&self.root);
    }
}
