//! Environment variable loading.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{
    AuthApiSecret, ClientCredentials, ConfigError, ServerConfig, TlsConfig,
    parse_auth_api_secrets_json,
};

/// Read a variable, treating empty values as unset.
fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match var(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a boolean, got '{other}'"),
            }),
        },
        None => Ok(None),
    }
}

/// Build a configuration from defaults overridden by the environment.
pub(super) fn load_from_env() -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse::<u16>("PORT")? {
        config.port = port;
    }

    if parse_bool("TLS_ENABLED")?.unwrap_or(false) {
        config.tls = Some(TlsConfig {
            cert_path: PathBuf::from(var("TLS_CERT_PATH").unwrap_or_default()),
            key_path: PathBuf::from(var("TLS_KEY_PATH").unwrap_or_default()),
        });
    }

    // Upstream realtime service
    if let Some(endpoint) = var("AZURE_OPENAI_ENDPOINT") {
        config.upstream_endpoint = endpoint;
    }
    if let Some(deployment) = var("AZURE_OPENAI_DEPLOYMENT") {
        config.upstream_deployment = deployment;
    }
    if let Some(api_version) = var("AZURE_OPENAI_API_VERSION") {
        config.upstream_api_version = api_version;
    }
    config.upstream_api_key = var("AZURE_OPENAI_KEY");

    if let (Some(tenant_id), Some(client_id), Some(client_secret)) = (
        var("AZURE_TENANT_ID"),
        var("AZURE_CLIENT_ID"),
        var("AZURE_CLIENT_SECRET"),
    ) {
        config.client_credentials = Some(ClientCredentials {
            tenant_id,
            client_id,
            client_secret,
        });
    }

    // Knowledge base
    config.search_endpoint = var("AZURE_SEARCH_ENDPOINT");
    if let Some(index) = var("AZURE_SEARCH_INDEX") {
        config.search_index = index;
    }
    config.search_api_key = var("AZURE_SEARCH_KEY");
    if let Some(semantic) = var("AZURE_SEARCH_SEMANTIC_CONFIGURATION") {
        config.search_semantic_configuration = semantic;
    }
    if let Some(field) = var("AZURE_SEARCH_VECTOR_FIELD") {
        config.search_vector_field = field;
    }

    // Session settings
    if let Some(instructions) = var("RELAY_INSTRUCTIONS") {
        config.relay_instructions = instructions;
    }
    config.relay_temperature = parse::<f64>("RELAY_TEMPERATURE")?;
    config.relay_max_response_output_tokens = parse::<u32>("RELAY_MAX_RESPONSE_OUTPUT_TOKENS")?;
    if let Some(capacity) = parse::<usize>("RELAY_CHANNEL_CAPACITY")? {
        config.relay_channel_capacity = capacity;
    }

    // Authentication
    config.auth_required = parse_bool("AUTH_REQUIRED")?.unwrap_or(false);
    if let Some(json) = var("AUTH_API_SECRETS_JSON") {
        config.auth_api_secrets = parse_auth_api_secrets_json(&json)?;
    } else if let Some(secret) = var("AUTH_API_SECRET") {
        config.auth_api_secrets = vec![AuthApiSecret {
            id: var("AUTH_API_SECRET_ID").unwrap_or_else(|| "default".to_string()),
            secret,
        }];
    }

    // Security
    config.cors_allowed_origins = var("CORS_ALLOWED_ORIGINS");
    if let Some(rps) = parse::<u32>("RATE_LIMIT_REQUESTS_PER_SECOND")? {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = parse::<u32>("RATE_LIMIT_BURST_SIZE")? {
        config.rate_limit_burst_size = burst;
    }
    config.max_websocket_connections = parse::<usize>("MAX_WEBSOCKET_CONNECTIONS")?;
    if let Some(per_ip) = parse::<u32>("MAX_CONNECTIONS_PER_IP")? {
        config.max_connections_per_ip = per_ip;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::cleanup_env_vars;
    use crate::core::realtime::DEFAULT_INSTRUCTIONS;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        cleanup_env_vars();

        let config = load_from_env().unwrap();
        assert_eq!(config.port, 3001);
        assert!(config.tls.is_none());
        assert!(config.client_credentials.is_none());
        assert!(config.search_endpoint.is_none());
        assert!(!config.auth_required);
    }

    #[test]
    #[serial]
    fn test_empty_values_are_unset() {
        cleanup_env_vars();
        unsafe {
            env::set_var("AZURE_OPENAI_KEY", "");
            env::set_var("RELAY_INSTRUCTIONS", "   ");
        }

        let config = load_from_env().unwrap();
        assert_eq!(config.upstream_api_key, None);
        assert_eq!(config.relay_instructions, DEFAULT_INSTRUCTIONS);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_client_credentials_need_all_three() {
        cleanup_env_vars();
        unsafe {
            env::set_var("AZURE_TENANT_ID", "tenant");
            env::set_var("AZURE_CLIENT_ID", "client");
        }
        assert!(load_from_env().unwrap().client_credentials.is_none());

        unsafe {
            env::set_var("AZURE_CLIENT_SECRET", "secret");
        }
        let credentials = load_from_env().unwrap().client_credentials.clone().unwrap();
        assert_eq!(credentials.tenant_id, "tenant");
        assert_eq!(credentials.client_secret, "secret");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_tls_and_auth_from_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TLS_ENABLED", "true");
            env::set_var("TLS_CERT_PATH", "/certs/cert.pem");
            env::set_var("TLS_KEY_PATH", "/certs/key.pem");
            env::set_var("AUTH_REQUIRED", "yes");
            env::set_var("AUTH_API_SECRET", "single");
        }

        let config = load_from_env().unwrap();
        let tls = config.tls.clone().unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("/certs/cert.pem"));
        assert_eq!(tls.key_path, PathBuf::from("/certs/key.pem"));
        assert!(config.auth_required);
        assert_eq!(config.find_api_secret_id("single"), Some("default"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_bool() {
        cleanup_env_vars();
        unsafe {
            env::set_var("AUTH_REQUIRED", "maybe");
        }

        assert!(matches!(
            load_from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));

        cleanup_env_vars();
    }
}
