//! Shared application state.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ServerConfig, UpstreamCredentialSource};
use crate::core::credentials::{ClientCredentialsTokenProvider, ServiceCredential, TokenProvider};
use crate::core::realtime::{RelayDefaults, RelayError, RelayResult, ToolRegistry, UpstreamConnector};
use crate::core::search::{SearchService, SearchSettings, knowledge_base_tools};

const HTTP_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a WebSocket connection slot was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// State shared by every request handler.
pub struct AppState {
    pub config: ServerConfig,
    pub upstream: UpstreamConnector,
    pub search: Option<Arc<SearchService>>,
    /// Tools registered on every relay instance
    pub tools: Arc<ToolRegistry>,
    pub relay_defaults: Arc<RelayDefaults>,
    /// Cancelled on server shutdown; every relay runs on a child token
    pub shutdown: CancellationToken,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build shared state from a validated configuration.
    pub fn new(config: ServerConfig) -> RelayResult<Arc<Self>> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .pool_idle_timeout(HTTP_POOL_IDLE_TIMEOUT)
            .build()
            .map_err(|e| RelayError::InvalidConfiguration(format!("HTTP client: {e}")))?;

        let token_provider: Option<Arc<dyn TokenProvider>> =
            config.client_credentials.as_ref().map(|credentials| {
                Arc::new(ClientCredentialsTokenProvider::new(
                    http.clone(),
                    &credentials.tenant_id,
                    credentials.client_id.clone(),
                    credentials.client_secret.clone(),
                )) as Arc<dyn TokenProvider>
            });

        let upstream_credential = match config.upstream_credential_source() {
            Some(UpstreamCredentialSource::OpenAiKey) => config
                .upstream_api_key
                .as_deref()
                .map(ServiceCredential::api_key),
            Some(UpstreamCredentialSource::SearchKey) => config
                .search_api_key
                .as_deref()
                .map(ServiceCredential::api_key),
            Some(UpstreamCredentialSource::ClientCredentials) => {
                token_provider.clone().map(ServiceCredential::bearer)
            }
            None => None,
        }
        .ok_or_else(|| {
            RelayError::InvalidConfiguration("No upstream credentials configured".to_string())
        })?;
        info!(
            source = ?config.upstream_credential_source(),
            "Upstream credential selected"
        );

        let upstream = UpstreamConnector::new(
            &config.upstream_endpoint,
            &config.upstream_deployment,
            &config.upstream_api_version,
            upstream_credential,
        )?;

        let search = match &config.search_endpoint {
            Some(endpoint) => {
                let credential = match (&config.search_api_key, &token_provider) {
                    (Some(key), _) => ServiceCredential::api_key(key.as_str()),
                    (None, Some(provider)) => ServiceCredential::bearer(Arc::clone(provider)),
                    (None, None) => {
                        return Err(RelayError::InvalidConfiguration(
                            "Search endpoint configured without credentials".to_string(),
                        ));
                    }
                };
                let settings = SearchSettings {
                    endpoint: endpoint.clone(),
                    index: config.search_index.clone(),
                    semantic_configuration: config.search_semantic_configuration.clone(),
                    vector_field: config.search_vector_field.clone(),
                };
                Some(Arc::new(SearchService::new(http.clone(), settings, credential)))
            }
            None => {
                info!("No knowledge base configured, relaying without tools");
                None
            }
        };

        let tools: ToolRegistry = search
            .as_ref()
            .map(|service| knowledge_base_tools(Arc::clone(service)))
            .unwrap_or_default()
            .into_iter()
            .collect();

        let relay_defaults = Arc::new(config.relay_defaults());

        Ok(Arc::new(Self {
            config,
            upstream,
            search,
            tools: Arc::new(tools),
            relay_defaults,
            shutdown: CancellationToken::new(),
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        }))
    }

    // ===== Connection accounting =====

    /// Reserve a WebSocket slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let max_global = self.config.max_websocket_connections;
        self.ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match max_global {
                Some(max) if current >= max => None,
                _ => Some(current + 1),
            })
            .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;

        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            drop(per_ip);
            self.ws_connections.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *per_ip += 1;

        debug!(ip = %ip, count = *per_ip, "WebSocket connection slot acquired");
        Ok(())
    }

    /// Return a slot taken by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });

        self.ip_connections.remove_if_mut(&ip, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
        debug!(ip = %ip, "WebSocket connection slot released");
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}

/// Releases a connection slot when dropped.
pub struct ConnectionGuard {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl ConnectionGuard {
    /// Take ownership of a slot already acquired for `ip`.
    pub fn new(state: Arc<AppState>, ip: IpAddr) -> Self {
        Self { state, ip }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}
