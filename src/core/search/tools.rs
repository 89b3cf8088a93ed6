//! The `search` and `report_grounding` tools backed by [`SearchService`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::service::{SearchError, SearchService};
use crate::core::realtime::{Tool, ToolDestination, ToolError, ToolInvoker};

pub const SEARCH_TOOL: &str = "search";
pub const REPORT_GROUNDING_TOOL: &str = "report_grounding";

impl From<SearchError> for ToolError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidArguments(msg) => ToolError::InvalidArguments(msg),
            other => ToolError::Backend(other.to_string()),
        }
    }
}

pub fn search_schema() -> Value {
    json!({
        "type": "function",
        "name": SEARCH_TOOL,
        "description": "Search the knowledge base. The knowledge base is in English, translate to and from English if needed. Results are formatted as a source name first in square brackets, followed by the text content, and a line with '-----' at the end of each result.",
        "parameters": {
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"]
        }
    })
}

pub fn report_grounding_schema() -> Value {
    json!({
        "type": "function",
        "name": REPORT_GROUNDING_TOOL,
        "description": "Report use of a source from the knowledge base as part of an answer (effectively, cite the source). Sources appear in square brackets before each knowledge base passage. Always use this tool to cite sources when responding with information from the knowledge base.",
        "parameters": {
            "type": "object",
            "properties": {
                "sources": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "List of source names from last statement actually used, do not include the ones not used to formulate a response"
                }
            },
            "required": ["sources"]
        }
    })
}

struct SearchInvoker(Arc<SearchService>);

#[async_trait]
impl ToolInvoker for SearchInvoker {
    async fn invoke(&self, arguments: Option<&str>) -> Result<Option<String>, ToolError> {
        Ok(self.0.search(arguments).await?)
    }
}

struct GroundingInvoker(Arc<SearchService>);

#[async_trait]
impl ToolInvoker for GroundingInvoker {
    async fn invoke(&self, arguments: Option<&str>) -> Result<Option<String>, ToolError> {
        Ok(self.0.report_grounding(arguments).await?)
    }
}

/// The knowledge-base tool set registered on every relay instance.
///
/// `search` results only go back upstream; grounding reports are also
/// surfaced to the client so it can show citations.
pub fn knowledge_base_tools(service: Arc<SearchService>) -> Vec<Tool> {
    vec![
        Tool::new(
            SEARCH_TOOL,
            search_schema(),
            ToolDestination::ServerOnly,
            Arc::new(SearchInvoker(Arc::clone(&service))),
        ),
        Tool::new(
            REPORT_GROUNDING_TOOL,
            report_grounding_schema(),
            ToolDestination::Client,
            Arc::new(GroundingInvoker(service)),
        ),
    ]
}
