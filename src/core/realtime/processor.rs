//! Realtime protocol policy between a client and the upstream service.
//!
//! A [`SessionProcessor`] supplies the two [`MessageTransform`] callbacks the
//! [`DuplexForwarder`](super::forwarder::DuplexForwarder) runs for one relay
//! instance:
//!
//! - client → upstream: `session.update` is rewritten so the fixed
//!   instructions, generation limits and tool catalogue always win
//! - upstream → client: tool-call scaffolding is hidden, tools are executed
//!   in the relay, their results are appended to the upstream conversation,
//!   and generation is resumed with `response.create` once the turn that
//!   requested the tool is done
//!
//! Every other message passes through byte for byte. The type sniffer
//! decides which messages are worth a full parse; a message that fails to
//! parse is forwarded as it arrived.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Value, json};
use tracing::{Instrument, Span, debug, info, warn};

use super::buffer::MessageBuffer;
use super::envelope::{RealtimeEnvelope, event};
use super::forwarder::{MessageTransform, ProcessorResult};
use super::sniffer;
use super::tools::{ToolDestination, ToolRegistry};

/// Instructions enforced on every session unless configured otherwise.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant. Only answer questions based on information you searched in the knowledge base,
accessible with the 'search' tool.
The user is listening to answers with audio, so it's **super** important that answers are _as short as possible_, a single sentence if at all possible.
Never read file names or source names or keys out!
Always use the following step-by-step instructions to respond:
1. Always use the 'search' tool to check the knowledge base before answering a question.
2. Always use the 'report_grounding' tool to report the source of information from the knowledge base.
3. Produce an answer that's as short as possible. If the answer isn't in the knowledge base, say you don't know.";

/// Session settings the relay applies regardless of what the client asks for.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayDefaults {
    pub instructions: Option<String>,
    pub temperature: Option<f64>,
    pub max_response_output_tokens: Option<u32>,
}

impl Default for RelayDefaults {
    fn default() -> Self {
        Self {
            instructions: Some(DEFAULT_INSTRUCTIONS.to_string()),
            temperature: None,
            max_response_output_tokens: None,
        }
    }
}

/// Per-connection state shared by both transform directions.
#[derive(Debug)]
pub struct SessionState {
    pending_tools: AtomicBool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// A new connection starts with a pending continuation.
    pub fn new() -> Self {
        Self {
            pending_tools: AtomicBool::new(true),
        }
    }

    pub fn pending_tools(&self) -> bool {
        self.pending_tools.load(Ordering::SeqCst)
    }

    pub fn mark_pending_tools(&self) {
        self.pending_tools.store(true, Ordering::SeqCst);
    }

    /// Clear the flag, returning whether it was set.
    pub fn take_pending_tools(&self) -> bool {
        self.pending_tools.swap(false, Ordering::SeqCst)
    }
}

/// Protocol policy for one relay instance.
#[derive(Debug)]
pub struct SessionProcessor {
    registry: Arc<ToolRegistry>,
    defaults: Arc<RelayDefaults>,
    state: SessionState,
}

impl SessionProcessor {
    pub fn new(registry: Arc<ToolRegistry>, defaults: Arc<RelayDefaults>) -> Self {
        Self {
            registry,
            defaults,
            state: SessionState::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Transform for messages travelling client → upstream.
    ///
    /// Each invocation runs inside the tracing span that was current when the
    /// transform was built.
    pub fn client_transform(self: &Arc<Self>) -> MessageTransform {
        let processor = Arc::clone(self);
        let span = Span::current();
        Arc::new(move |buffer| {
            let processor = Arc::clone(&processor);
            Box::pin(
                async move { processor.process_client_message(buffer) }.instrument(span.clone()),
            )
        })
    }

    /// Transform for messages travelling upstream → client.
    pub fn upstream_transform(self: &Arc<Self>) -> MessageTransform {
        let processor = Arc::clone(self);
        let span = Span::current();
        Arc::new(move |buffer| {
            let processor = Arc::clone(&processor);
            Box::pin(
                async move { processor.process_upstream_message(buffer).await }
                    .instrument(span.clone()),
            )
        })
    }

    /// Apply the server-side session settings to a client `session.update`.
    pub fn process_client_message(&self, mut buffer: MessageBuffer) -> ProcessorResult {
        if sniffer::message_type(buffer.as_bytes()) != event::SESSION_UPDATE {
            return ProcessorResult::forward(buffer);
        }

        let Some(mut envelope) = parse(&buffer) else {
            return ProcessorResult::forward(buffer);
        };
        let tool_choice = if self.registry.is_empty() { "none" } else { "auto" };
        let Some(session) = envelope.session_mut() else {
            return ProcessorResult::forward(buffer);
        };

        if let Some(instructions) = &self.defaults.instructions {
            session.insert("instructions".to_string(), json!(instructions));
        }
        if let Some(temperature) = self.defaults.temperature {
            session.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = self.defaults.max_response_output_tokens {
            session.insert("max_response_output_tokens".to_string(), json!(max_tokens));
        }
        session.insert("tool_choice".to_string(), json!(tool_choice));
        session.insert("tools".to_string(), Value::Array(self.registry.schemas()));

        debug!("Applied server session settings to session.update");
        envelope.write_into(&mut buffer);
        ProcessorResult::forward(buffer)
    }

    /// Hide tool machinery from the client and drive tool execution.
    pub async fn process_upstream_message(&self, buffer: MessageBuffer) -> ProcessorResult {
        let message_type = sniffer::message_type(buffer.as_bytes());

        match message_type.as_str() {
            event::SESSION_CREATED => scrub_session_created(buffer),
            event::RESPONSE_OUTPUT_ITEM_ADDED => {
                suppress_item_types(buffer, &[event::ITEM_FUNCTION_CALL])
            }
            event::CONVERSATION_ITEM_CREATED => suppress_item_types(
                buffer,
                &[event::ITEM_FUNCTION_CALL, event::ITEM_FUNCTION_CALL_OUTPUT],
            ),
            event::RESPONSE_OUTPUT_ITEM_DONE => self.handle_output_item_done(buffer).await,
            event::RESPONSE_DONE => self.handle_response_done(buffer),
            event::RESPONSE_FUNCTION_CALL_ARGUMENTS_DELTA
            | event::RESPONSE_FUNCTION_CALL_ARGUMENTS_DONE => ProcessorResult::suppress(),
            _ => ProcessorResult::forward(buffer),
        }
    }

    async fn handle_output_item_done(&self, buffer: MessageBuffer) -> ProcessorResult {
        let Some(envelope) = parse(&buffer) else {
            return ProcessorResult::forward(buffer);
        };
        if envelope.item_type() != Some(event::ITEM_FUNCTION_CALL) {
            return ProcessorResult::forward(buffer);
        }

        let (Some(call_id), Some(name)) = (envelope.tool_call_id(), envelope.tool_name()) else {
            debug!("Dropping function_call item without call_id or name");
            return ProcessorResult::suppress();
        };

        self.state.mark_pending_tools();

        let Some(tool) = self.registry.lookup(name) else {
            warn!(tool = %name, call_id = %call_id, "Upstream requested an unregistered tool");
            return ProcessorResult::suppress();
        };

        info!(tool = %tool.name(), call_id = %call_id, "Invoking tool");
        let result = match tool.invoke(envelope.tool_arguments()).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %tool.name(), call_id = %call_id, error = %e, "Tool invocation failed");
                return ProcessorResult::suppress();
            }
        };

        let output = match tool.destination() {
            ToolDestination::ServerOnly => json!(result),
            ToolDestination::Client => Value::Null,
        };
        let backward = MessageBuffer::from_json(&json!({
            "type": event::CONVERSATION_ITEM_CREATE,
            "item": {
                "type": event::ITEM_FUNCTION_CALL_OUTPUT,
                "call_id": call_id,
                "output": output,
            }
        }));

        match tool.destination() {
            ToolDestination::ServerOnly => ProcessorResult::suppress().with_backward(backward),
            ToolDestination::Client => {
                let response = MessageBuffer::from_json(&json!({
                    "type": event::MIDDLE_TIER_TOOL_RESPONSE,
                    "previous_item_id": call_id,
                    "tool_name": name,
                    "tool_result": result,
                }));
                ProcessorResult::forward(response).with_backward(backward)
            }
        }
    }

    fn handle_response_done(&self, mut buffer: MessageBuffer) -> ProcessorResult {
        let backward = self.state.take_pending_tools().then(|| {
            debug!("Requesting continuation after tool call");
            MessageBuffer::from_json(&json!({ "type": event::RESPONSE_CREATE }))
        });

        if let Some(mut envelope) = parse(&buffer) {
            if envelope.trim_tool_calls() {
                envelope.write_into(&mut buffer);
            }
        }

        ProcessorResult {
            forward: Some(buffer),
            backward,
        }
    }
}

fn parse(buffer: &MessageBuffer) -> Option<RealtimeEnvelope> {
    match RealtimeEnvelope::parse(buffer) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            debug!(error = %e, "Forwarding unparseable message unchanged");
            None
        }
    }
}

fn scrub_session_created(mut buffer: MessageBuffer) -> ProcessorResult {
    let Some(mut envelope) = parse(&buffer) else {
        return ProcessorResult::forward(buffer);
    };
    if let Some(session) = envelope.session_mut() {
        session.insert("instructions".to_string(), json!(""));
        session.insert("tools".to_string(), json!([]));
        session.insert("tool_choice".to_string(), json!("none"));
        session.insert("max_response_output_tokens".to_string(), Value::Null);
        envelope.write_into(&mut buffer);
    }
    ProcessorResult::forward(buffer)
}

fn suppress_item_types(buffer: MessageBuffer, hidden: &[&str]) -> ProcessorResult {
    match parse(&buffer) {
        Some(envelope) if envelope.item_type().is_some_and(|t| hidden.contains(&t)) => {
            ProcessorResult::suppress()
        }
        _ => ProcessorResult::forward(buffer),
    }
}
