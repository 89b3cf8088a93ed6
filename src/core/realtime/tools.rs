//! Server-side tool catalogue.
//!
//! Tools are registered once when a relay instance starts and are immutable
//! afterwards. Their schemas are injected into every `session.update` the
//! client sends, and function calls coming back from the upstream service
//! are dispatched to the matching [`ToolInvoker`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// Where the result of a tool call is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolDestination {
    /// The result only goes back to the upstream service.
    ServerOnly,
    /// The result is also surfaced to the client as a tool-response event.
    Client,
}

impl fmt::Display for ToolDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolDestination::ServerOnly => write!(f, "server-only"),
            ToolDestination::Client => write!(f, "client"),
        }
    }
}

/// Errors raised by a tool implementation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The arguments JSON could not be interpreted
    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// The backing capability failed
    #[error("Tool backend error: {0}")]
    Backend(String),
}

/// The capability behind a tool.
///
/// Arguments and results are opaque JSON text. `None` arguments mean the
/// upstream service sent no arguments; a `None` result means the tool had
/// nothing to report.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, arguments: Option<&str>) -> Result<Option<String>, ToolError>;
}

/// A named, schema-described capability.
#[derive(Clone)]
pub struct Tool {
    name: String,
    schema: Value,
    destination: ToolDestination,
    invoker: Arc<dyn ToolInvoker>,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        schema: Value,
        destination: ToolDestination,
        invoker: Arc<dyn ToolInvoker>,
    ) -> Self {
        let name = name.into();
        info!(tool = %name, destination = %destination, "Creating tool");
        Self {
            name,
            schema,
            destination,
            invoker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn destination(&self) -> ToolDestination {
        self.destination
    }

    pub async fn invoke(&self, arguments: Option<&str>) -> Result<Option<String>, ToolError> {
        self.invoker.invoke(arguments).await
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Case-insensitive name → tool map that keeps registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool, replacing any tool registered under the same name.
    pub fn register(&mut self, tool: Tool) {
        let key = tool.name().to_lowercase();
        let tool = Arc::new(tool);
        match self.index.get(&key) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(key, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Tool>> {
        let slot = *self.index.get(&name.to_lowercase())?;
        self.tools.get(slot).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of all registered tools, in registration order.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.iter().map(|tool| tool.schema.clone()).collect()
    }
}

impl FromIterator<Tool> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = Tool>>(iter: I) -> Self {
        let mut registry = ToolRegistry::new();
        for tool in iter {
            registry.register(tool);
        }
        registry
    }
}
