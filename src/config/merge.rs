//! Applying YAML values on top of the environment-derived configuration.

use std::path::PathBuf;

use super::yaml::{
    AuthYaml, RelayYaml, SearchYaml, SecurityYaml, ServerYaml, UpstreamYaml, YamlConfig,
};
use super::{AuthApiSecret, ClientCredentials, ConfigError, ServerConfig, TlsConfig};

/// Override `config` with every value present in `yaml`.
pub(super) fn apply_yaml(config: &mut ServerConfig, yaml: YamlConfig) -> Result<(), ConfigError> {
    if let Some(server) = yaml.server {
        apply_server(config, server);
    }
    if let Some(upstream) = yaml.upstream {
        apply_upstream(config, upstream)?;
    }
    if let Some(search) = yaml.search {
        apply_search(config, search);
    }
    if let Some(relay) = yaml.relay {
        apply_relay(config, relay);
    }
    if let Some(auth) = yaml.auth {
        apply_auth(config, auth);
    }
    if let Some(security) = yaml.security {
        apply_security(config, security);
    }
    Ok(())
}

fn apply_server(config: &mut ServerConfig, server: ServerYaml) {
    if let Some(host) = server.host {
        config.host = host;
    }
    if let Some(port) = server.port {
        config.port = port;
    }
    if let Some(tls) = server.tls {
        match tls.enabled {
            Some(false) => config.tls = None,
            Some(true) => {
                let current = config.tls.take();
                config.tls = Some(TlsConfig {
                    cert_path: tls
                        .cert_path
                        .map(PathBuf::from)
                        .or_else(|| current.as_ref().map(|t| t.cert_path.clone()))
                        .unwrap_or_default(),
                    key_path: tls
                        .key_path
                        .map(PathBuf::from)
                        .or_else(|| current.as_ref().map(|t| t.key_path.clone()))
                        .unwrap_or_default(),
                });
            }
            None => {
                if let Some(current) = config.tls.as_mut() {
                    if let Some(cert_path) = tls.cert_path {
                        current.cert_path = PathBuf::from(cert_path);
                    }
                    if let Some(key_path) = tls.key_path {
                        current.key_path = PathBuf::from(key_path);
                    }
                }
            }
        }
    }
}

fn apply_upstream(config: &mut ServerConfig, upstream: UpstreamYaml) -> Result<(), ConfigError> {
    if let Some(endpoint) = upstream.endpoint {
        config.upstream_endpoint = endpoint;
    }
    if let Some(deployment) = upstream.deployment {
        config.upstream_deployment = deployment;
    }
    if let Some(api_version) = upstream.api_version {
        config.upstream_api_version = api_version;
    }
    if let Some(api_key) = upstream.api_key {
        config.upstream_api_key = Some(api_key);
    }
    if let Some(token) = upstream.token {
        match (token.tenant_id, token.client_id, token.client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => {
                config.client_credentials = Some(ClientCredentials {
                    tenant_id,
                    client_id,
                    client_secret,
                });
            }
            (None, None, None) => {}
            _ => {
                return Err(ConfigError::Validation(
                    "upstream.token requires tenant_id, client_id and client_secret".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn apply_search(config: &mut ServerConfig, search: SearchYaml) {
    if let Some(endpoint) = search.endpoint {
        config.search_endpoint = Some(endpoint);
    }
    if let Some(index) = search.index {
        config.search_index = index;
    }
    if let Some(api_key) = search.api_key {
        config.search_api_key = Some(api_key);
    }
    if let Some(semantic) = search.semantic_configuration {
        config.search_semantic_configuration = semantic;
    }
    if let Some(field) = search.vector_field {
        config.search_vector_field = field;
    }
}

fn apply_relay(config: &mut ServerConfig, relay: RelayYaml) {
    if let Some(instructions) = relay.instructions {
        config.relay_instructions = instructions;
    }
    if let Some(temperature) = relay.temperature {
        config.relay_temperature = Some(temperature);
    }
    if let Some(max_tokens) = relay.max_response_output_tokens {
        config.relay_max_response_output_tokens = Some(max_tokens);
    }
    if let Some(capacity) = relay.channel_capacity {
        config.relay_channel_capacity = capacity;
    }
}

fn apply_auth(config: &mut ServerConfig, auth: AuthYaml) {
    if let Some(required) = auth.required {
        config.auth_required = required;
    }
    if !auth.api_secrets.is_empty() {
        config.auth_api_secrets = auth
            .api_secrets
            .into_iter()
            .map(|entry| AuthApiSecret {
                id: entry.id,
                secret: entry.secret,
            })
            .collect();
    } else if let Some(secret) = auth.api_secret {
        config.auth_api_secrets = vec![AuthApiSecret {
            id: "default".to_string(),
            secret,
        }];
    }
}

fn apply_security(config: &mut ServerConfig, security: SecurityYaml) {
    if let Some(origins) = security.cors_allowed_origins {
        config.cors_allowed_origins = Some(origins);
    }
    if let Some(rps) = security.rate_limit_requests_per_second {
        config.rate_limit_requests_per_second = rps;
    }
    if let Some(burst) = security.rate_limit_burst_size {
        config.rate_limit_burst_size = burst;
    }
    if let Some(max) = security.max_websocket_connections {
        config.max_websocket_connections = Some(max);
    }
    if let Some(per_ip) = security.max_connections_per_ip {
        config.max_connections_per_ip = per_ip;
    }
}
