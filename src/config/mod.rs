//! Configuration module for the relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::auth::match_api_secret_id;
use crate::core::realtime::{
    DEFAULT_API_VERSION, DEFAULT_CHANNEL_CAPACITY, DEFAULT_INSTRUCTIONS, RelayDefaults,
};

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

/// Default upstream endpoint when none is configured.
pub const DEFAULT_UPSTREAM_ENDPOINT: &str = "https://api.openai.com";

/// Default upstream deployment name.
pub const DEFAULT_DEPLOYMENT: &str = "gpt-4o-realtime-preview";

/// Default knowledge-base index.
pub const DEFAULT_SEARCH_INDEX: &str = "contosobenefits";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// API secret authentication entry with a client identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthApiSecret {
    pub id: String,
    pub secret: String,
}

/// Client-credentials grant settings for token-based upstream auth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

/// How the relay authenticates to the upstream realtime service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamCredentialSource {
    /// `AZURE_OPENAI_KEY` as a static `api-key`.
    OpenAiKey,
    /// `AZURE_SEARCH_KEY` reused as the upstream key when it is the only key.
    SearchKey,
    /// Bearer tokens from the client-credentials grant.
    ClientCredentials,
}

/// Server configuration
///
/// Contains all configuration needed to run the relay, including:
/// - Server settings (host, port, TLS)
/// - Upstream realtime service location and credentials
/// - Knowledge-base location and credentials
/// - Session settings enforced on every client
/// - Security settings (auth, CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Upstream realtime service
    pub upstream_endpoint: String,
    pub upstream_deployment: String,
    pub upstream_api_version: String,
    pub upstream_api_key: Option<String>,
    /// Client-credentials grant, used when no static key applies
    pub client_credentials: Option<ClientCredentials>,

    // Knowledge base
    /// Search service endpoint. Without it the relay registers no tools.
    pub search_endpoint: Option<String>,
    pub search_index: String,
    pub search_api_key: Option<String>,
    pub search_semantic_configuration: String,
    pub search_vector_field: String,

    // Session settings enforced on every client
    pub relay_instructions: String,
    pub relay_temperature: Option<f64>,
    pub relay_max_response_output_tokens: Option<u32>,
    /// Capacity of each forwarder queue
    pub relay_channel_capacity: usize,

    // Authentication configuration
    pub auth_api_secrets: Vec<AuthApiSecret>,
    pub auth_required: bool,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            upstream_endpoint: DEFAULT_UPSTREAM_ENDPOINT.to_string(),
            upstream_deployment: DEFAULT_DEPLOYMENT.to_string(),
            upstream_api_version: DEFAULT_API_VERSION.to_string(),
            upstream_api_key: None,
            client_credentials: None,
            search_endpoint: None,
            search_index: DEFAULT_SEARCH_INDEX.to_string(),
            search_api_key: None,
            search_semantic_configuration: "default".to_string(),
            search_vector_field: "text_vector".to_string(),
            relay_instructions: DEFAULT_INSTRUCTIONS.to_string(),
            relay_temperature: None,
            relay_max_response_output_tokens: None,
            relay_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            auth_api_secrets: Vec::new(),
            auth_required: false,
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

/// Implement Drop to zeroize all secret fields when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.upstream_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.search_api_key {
            key.zeroize();
        }
        if let Some(ref mut credentials) = self.client_credentials {
            credentials.client_secret.zeroize();
        }
        for secret in &mut self.auth_api_secrets {
            secret.secret.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// `.env` is loaded in `main.rs` before this is called, so values from it
    /// are visible here unless the real environment overrides them.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = env::load_from_env()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;

        let mut config = env::load_from_env()?;
        merge::apply_yaml(&mut config, yaml_config)?;

        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Check if API secret authentication is configured
    pub fn has_api_secret_auth(&self) -> bool {
        !self.auth_api_secrets.is_empty()
    }

    /// Find the API secret identifier that matches a bearer token
    pub fn find_api_secret_id(&self, token: &str) -> Option<&str> {
        match_api_secret_id(token, &self.auth_api_secrets)
    }

    /// Pick the upstream credential strategy.
    ///
    /// A configured OpenAI key wins. When only the search key is configured it
    /// is reused for the upstream service. Otherwise the client-credentials
    /// grant is used if it is configured.
    pub fn upstream_credential_source(&self) -> Option<UpstreamCredentialSource> {
        match (&self.upstream_api_key, &self.search_api_key) {
            (Some(_), _) => Some(UpstreamCredentialSource::OpenAiKey),
            (None, Some(_)) => Some(UpstreamCredentialSource::SearchKey),
            (None, None) => self
                .client_credentials
                .as_ref()
                .map(|_| UpstreamCredentialSource::ClientCredentials),
        }
    }

    /// Session settings applied to every relay instance.
    pub fn relay_defaults(&self) -> RelayDefaults {
        RelayDefaults {
            instructions: Some(self.relay_instructions.clone()),
            temperature: self.relay_temperature,
            max_response_output_tokens: self.relay_max_response_output_tokens,
        }
    }
}

pub(crate) fn parse_auth_api_secrets_json(json_str: &str) -> Result<Vec<AuthApiSecret>, ConfigError> {
    #[derive(serde::Deserialize)]
    struct AuthApiSecretJson {
        id: String,
        secret: String,
    }

    let secrets: Vec<AuthApiSecretJson> =
        serde_json::from_str(json_str).map_err(|e| ConfigError::InvalidValue {
            key: "AUTH_API_SECRETS_JSON".to_string(),
            reason: e.to_string(),
        })?;

    Ok(secrets
        .into_iter()
        .map(|entry| AuthApiSecret {
            id: entry.id,
            secret: entry.secret,
        })
        .collect())
}
