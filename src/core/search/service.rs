//! Client for an Azure AI Search compatible knowledge base.

use std::time::Duration;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::credentials::{CredentialError, SEARCH_SCOPE, ServiceCredential};

/// REST API version used for document queries.
pub const SEARCH_API_VERSION: &str = "2024-07-01";

/// Documents returned by a knowledge-base search.
const SEARCH_TOP: usize = 5;

/// Nearest neighbours considered by the vector query.
const VECTOR_K: usize = 50;

const SELECT_FIELDS: &str = "chunk_id,title,chunk";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Grounding sources must be plain chunk keys (`[a-zA-Z0-9_=-]+`) so they
/// can't inject query syntax.
fn is_source_key(source: &str) -> bool {
    !source.is_empty()
        && source
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'=' | b'-'))
}

#[derive(Debug, Error)]
pub enum SearchError {
    /// Tool arguments were not the expected JSON shape
    #[error("Invalid search arguments: {0}")]
    InvalidArguments(String),

    /// The search request could not be sent
    #[error("Search request failed: {0}")]
    Request(String),

    /// The service answered with a non-success status
    #[error("Search service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded
    #[error("Failed to decode search response: {0}")]
    Decode(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Knowledge-base location and query settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSettings {
    pub endpoint: String,
    pub index: String,
    pub semantic_configuration: String,
    pub vector_field: String,
}

/// One indexed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    #[serde(default)]
    pub chunk_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub chunk: String,
}

/// Sources cited by the model, resolved to their documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundingData {
    pub sources: Vec<SearchDocument>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct GroundingArgs {
    sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    value: Vec<SearchDocument>,
}

/// Issues knowledge-base queries on behalf of the `search` and
/// `report_grounding` tools.
#[derive(Debug, Clone)]
pub struct SearchService {
    http: reqwest::Client,
    settings: SearchSettings,
    credential: ServiceCredential,
    url: String,
}

impl SearchService {
    pub fn new(
        http: reqwest::Client,
        settings: SearchSettings,
        credential: ServiceCredential,
    ) -> Self {
        let url = format!(
            "{}/indexes/{}/docs/search?api-version={}",
            settings.endpoint.trim_end_matches('/'),
            settings.index,
            SEARCH_API_VERSION
        );
        Self {
            http,
            settings,
            credential,
            url,
        }
    }

    /// Run a hybrid semantic + vector search.
    ///
    /// `arguments` is `{"query": "..."}`. The result lists each hit as
    /// `[chunk_id]: chunk` followed by a `-----` line.
    pub async fn search(&self, arguments: Option<&str>) -> Result<Option<String>, SearchError> {
        let Some(arguments) = arguments else {
            return Ok(None);
        };
        let args: SearchArgs = serde_json::from_str(arguments)
            .map_err(|e| SearchError::InvalidArguments(e.to_string()))?;

        info!(query = %args.query, "Searching knowledge base");

        let body = json!({
            "search": args.query,
            "queryType": "semantic",
            "semanticConfiguration": self.settings.semantic_configuration,
            "top": SEARCH_TOP,
            "select": SELECT_FIELDS,
            "vectorQueries": [{
                "kind": "text",
                "text": args.query,
                "k": VECTOR_K,
                "fields": self.settings.vector_field,
            }],
        });

        let documents = self.query(&body).await?;
        debug!(hits = documents.len(), "Knowledge base search complete");

        let mut output = String::new();
        for document in &documents {
            output.push_str(&format!("[{}]: {}\n-----\n", document.chunk_id, document.chunk));
        }
        Ok(Some(output))
    }

    /// Resolve cited source keys to their documents.
    ///
    /// `arguments` is `{"sources": ["..."]}`. Keys that are not plain chunk
    /// ids are dropped; when none remain the result is `None`.
    pub async fn report_grounding(
        &self,
        arguments: Option<&str>,
    ) -> Result<Option<String>, SearchError> {
        let Some(arguments) = arguments else {
            return Ok(None);
        };
        let args: GroundingArgs = serde_json::from_str(arguments)
            .map_err(|e| SearchError::InvalidArguments(e.to_string()))?;

        let sources: Vec<String> = args
            .sources
            .into_iter()
            .filter(|source| is_source_key(source))
            .collect();
        if sources.is_empty() {
            return Ok(None);
        }

        let condition = sources.join(" OR ");
        info!(condition = %condition, "Grounding sources");

        // chunk_id is searchable with a keyword tokenizer but not filterable.
        let body = json!({
            "search": condition,
            "queryType": "full",
            "top": sources.len(),
            "select": SELECT_FIELDS,
            "searchFields": "chunk_id",
        });

        let documents = self.query(&body).await?;
        let grounding = GroundingData { sources: documents };
        let encoded =
            serde_json::to_string(&grounding).map_err(|e| SearchError::Decode(e.to_string()))?;
        Ok(Some(encoded))
    }

    async fn query(&self, body: &Value) -> Result<Vec<SearchDocument>, SearchError> {
        let mut headers = HeaderMap::new();
        self.credential.apply(SEARCH_SCOPE, &mut headers).await?;

        let response = self
            .http
            .post(&self.url)
            .headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::Status { status, body });
        }

        let decoded: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;
        Ok(decoded.value)
    }
}
