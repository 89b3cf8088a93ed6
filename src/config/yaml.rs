use serde::Deserialize;
use std::path::PathBuf;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// This structure represents the full configuration that can be loaded from a YAML file.
/// All fields are optional to allow partial configuration. Values found here override
/// the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   tls:
///     enabled: true
///     cert_path: "/etc/relay/cert.pem"
///     key_path: "/etc/relay/key.pem"
///
/// upstream:
///   endpoint: "https://my-resource.openai.azure.com"
///   deployment: "gpt-4o-realtime-preview"
///   api_version: "2024-10-01-preview"
///   api_key: "your-openai-key"
///   token:
///     tenant_id: "tenant"
///     client_id: "client"
///     client_secret: "secret"
///
/// search:
///   endpoint: "https://my-search.search.windows.net"
///   index: "contosobenefits"
///   api_key: "your-search-key"
///   semantic_configuration: "default"
///   vector_field: "text_vector"
///
/// relay:
///   instructions: "You are a helpful assistant."
///   temperature: 0.7
///   max_response_output_tokens: 1024
///   channel_capacity: 16
///
/// auth:
///   required: true
///   api_secrets:
///     - id: "client-a"
///       secret: "your-api-secret"
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub upstream: Option<UpstreamYaml>,
    pub search: Option<SearchYaml>,
    pub relay: Option<RelayYaml>,
    pub auth: Option<AuthYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Upstream realtime service from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpstreamYaml {
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub api_key: Option<String>,
    /// Client-credentials grant used when no key is configured
    pub token: Option<TokenYaml>,
}

/// Client-credentials grant from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TokenYaml {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Knowledge base from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SearchYaml {
    pub endpoint: Option<String>,
    pub index: Option<String>,
    pub api_key: Option<String>,
    pub semantic_configuration: Option<String>,
    pub vector_field: Option<String>,
}

/// Session settings enforced on every client
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub instructions: Option<String>,
    pub temperature: Option<f64>,
    pub max_response_output_tokens: Option<u32>,
    pub channel_capacity: Option<usize>,
}

/// Authentication configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AuthYaml {
    pub required: Option<bool>,
    /// Preferred multi-secret form. If non-empty, it takes precedence over api_secret.
    #[serde(default)]
    pub api_secrets: Vec<AuthApiSecretYaml>,
    /// Single-secret alias. Ignored when api_secrets is non-empty.
    pub api_secret: Option<String>,
}

/// API secret authentication entry in YAML
#[derive(Debug, Clone, Deserialize)]
pub struct AuthApiSecretYaml {
    pub id: String,
    pub secret: String,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*" for all)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: YamlConfig =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Yaml(e.to_string()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
  tls:
    enabled: true
    cert_path: "/tmp/cert.pem"
    key_path: "/tmp/key.pem"

upstream:
  endpoint: "https://res.openai.azure.com"
  deployment: "realtime"
  api_key: "openai-key"
  token:
    tenant_id: "tenant"
    client_id: "client"
    client_secret: "secret"

search:
  endpoint: "https://kb.search.windows.net"
  index: "handbook"
  vector_field: "embedding"

relay:
  instructions: "Answer briefly."
  temperature: 0.7
  max_response_output_tokens: 512
  channel_capacity: 32

auth:
  required: true
  api_secrets:
    - id: "client-a"
      secret: "auth-secret"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.as_ref().unwrap();
        assert_eq!(server.host, Some("127.0.0.1".to_string()));
        assert_eq!(server.port, Some(8080));
        assert_eq!(server.tls.as_ref().unwrap().enabled, Some(true));

        let upstream = config.upstream.as_ref().unwrap();
        assert_eq!(upstream.deployment, Some("realtime".to_string()));
        assert_eq!(
            upstream.token.as_ref().unwrap().client_secret,
            Some("secret".to_string())
        );

        let search = config.search.as_ref().unwrap();
        assert_eq!(search.index, Some("handbook".to_string()));
        assert_eq!(search.vector_field, Some("embedding".to_string()));
        assert_eq!(search.api_key, None);

        let relay = config.relay.as_ref().unwrap();
        assert_eq!(relay.instructions.as_deref(), Some("Answer briefly."));
        assert_eq!(relay.temperature, Some(0.7));
        assert_eq!(relay.max_response_output_tokens, Some(512));
        assert_eq!(relay.channel_capacity, Some(32));

        let auth = config.auth.as_ref().unwrap();
        assert_eq!(auth.required, Some(true));
        assert_eq!(auth.api_secrets.len(), 1);
        assert_eq!(auth.api_secrets[0].id, "client-a");
        assert_eq!(auth.api_secrets[0].secret, "auth-secret");
    }

    #[test]
    fn test_yaml_config_auth_single_api_secret() {
        let yaml = r#"
auth:
  api_secret: "single-secret"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let auth = config.auth.as_ref().unwrap();
        assert!(auth.api_secrets.is_empty());
        assert_eq!(auth.api_secret.as_deref(), Some("single-secret"));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
security:
  max_websocket_connections: 10
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.server.is_none());
        assert!(config.upstream.is_none());
        assert_eq!(
            config.security.as_ref().unwrap().max_websocket_connections,
            Some(10)
        );
    }

    #[test]
    fn test_yaml_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "server:\n  port: 9000\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(config.server.unwrap().port, Some(9000));
    }

    #[test]
    fn test_yaml_config_from_file_errors() {
        let missing = PathBuf::from("/nonexistent/relay.yaml");
        assert!(matches!(
            YamlConfig::from_file(&missing),
            Err(ConfigError::Read { .. })
        ));

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bad.yaml");
        fs::write(&config_path, "server: [unclosed").unwrap();
        assert!(matches!(
            YamlConfig::from_file(&config_path),
            Err(ConfigError::Yaml(_))
        ));
    }
}
