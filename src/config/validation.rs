//! Configuration validation.

use super::{ConfigError, ServerConfig};
use crate::core::realtime::realtime_url;

/// Temperature range accepted by the realtime service.
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f64> = 0.6..=1.2;

/// Check the merged configuration before the server starts.
pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_tls(config)?;
    validate_upstream(config)?;
    validate_search(config)?;
    validate_relay(config)?;
    validate_auth(config)?;
    validate_security(config)?;
    Ok(())
}

fn validate_tls(config: &ServerConfig) -> Result<(), ConfigError> {
    let Some(tls) = &config.tls else {
        return Ok(());
    };

    for (label, path) in [("certificate", &tls.cert_path), ("private key", &tls.key_path)] {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(format!(
                "TLS is enabled but no {label} path is configured"
            )));
        }
        if !path.exists() {
            return Err(ConfigError::Validation(format!(
                "TLS {label} not found: {}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn validate_upstream(config: &ServerConfig) -> Result<(), ConfigError> {
    realtime_url(
        &config.upstream_endpoint,
        &config.upstream_deployment,
        &config.upstream_api_version,
    )
    .map_err(|e| ConfigError::Validation(e.to_string()))?;

    if config.upstream_deployment.trim().is_empty() {
        return Err(ConfigError::Validation(
            "Upstream deployment must not be empty".to_string(),
        ));
    }

    if config.upstream_credential_source().is_none() {
        return Err(ConfigError::Validation(
            "No upstream credentials: set AZURE_OPENAI_KEY, AZURE_SEARCH_KEY or \
             AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_search(config: &ServerConfig) -> Result<(), ConfigError> {
    let Some(endpoint) = &config.search_endpoint else {
        return Ok(());
    };

    url::Url::parse(endpoint)
        .map_err(|e| ConfigError::Validation(format!("Invalid search endpoint {endpoint}: {e}")))?;

    if config.search_index.trim().is_empty() {
        return Err(ConfigError::Validation(
            "Search index must not be empty".to_string(),
        ));
    }
    if config.search_api_key.is_none() && config.client_credentials.is_none() {
        return Err(ConfigError::Validation(
            "Search endpoint is configured without AZURE_SEARCH_KEY or client credentials"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_relay(config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(temperature) = config.relay_temperature {
        if !TEMPERATURE_RANGE.contains(&temperature) {
            return Err(ConfigError::Validation(format!(
                "Relay temperature {temperature} is outside {}..={}",
                TEMPERATURE_RANGE.start(),
                TEMPERATURE_RANGE.end()
            )));
        }
    }
    if config.relay_max_response_output_tokens == Some(0) {
        return Err(ConfigError::Validation(
            "Relay max_response_output_tokens must be positive".to_string(),
        ));
    }
    if config.relay_channel_capacity == 0 {
        return Err(ConfigError::Validation(
            "Relay channel capacity must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_auth(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.auth_required && !config.has_api_secret_auth() {
        return Err(ConfigError::Validation(
            "Authentication is required but no API secrets are configured".to_string(),
        ));
    }
    if config
        .auth_api_secrets
        .iter()
        .any(|entry| entry.secret.is_empty() || entry.id.is_empty())
    {
        return Err(ConfigError::Validation(
            "API secrets need a non-empty id and secret".to_string(),
        ));
    }
    Ok(())
}

fn validate_security(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.rate_limit_requests_per_second == 0 || config.rate_limit_burst_size == 0 {
        return Err(ConfigError::Validation(
            "Rate limit and burst size must be positive".to_string(),
        ));
    }
    if config.max_websocket_connections == Some(0) || config.max_connections_per_ip == 0 {
        return Err(ConfigError::Validation(
            "Connection limits must be positive".to_string(),
        ));
    }
    Ok(())
}
