//! Knowledge-base search backing the relay's server-side tools.

mod service;
mod tools;

pub use service::{
    GroundingData, SEARCH_API_VERSION, SearchDocument, SearchError, SearchService, SearchSettings,
};
pub use tools::{
    REPORT_GROUNDING_TOOL, SEARCH_TOOL, knowledge_base_tools, report_grounding_schema,
    search_schema,
};
