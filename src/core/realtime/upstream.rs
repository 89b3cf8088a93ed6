//! Connection setup for the upstream realtime service.

use std::time::Duration;

use http::HeaderValue;
use http::header::HeaderName;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tracing::{debug, info};
use url::Url;

use super::error::{RelayError, RelayResult};
use crate::core::credentials::{COGNITIVE_SERVICES_SCOPE, ServiceCredential};

/// Request correlation header copied from the client handshake.
pub const REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Path of the realtime endpoint on the upstream host.
pub const REALTIME_PATH: &str = "/openai/realtime";

/// Default `api-version` query value.
pub const DEFAULT_API_VERSION: &str = "2024-10-01-preview";

/// Bound on credential lookup plus handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum WebSocket message size accepted from upstream (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// A connected upstream socket.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builds authenticated connections to the upstream realtime service.
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    url: Url,
    credential: ServiceCredential,
    connect_timeout: Duration,
}

impl UpstreamConnector {
    /// Create a connector for `deployment` on `endpoint`.
    ///
    /// `https` and `http` endpoints map to `wss` and `ws`.
    pub fn new(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        credential: ServiceCredential,
    ) -> RelayResult<Self> {
        let url = realtime_url(endpoint, deployment, api_version)?;
        Ok(Self {
            url,
            credential,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    /// Override [`CONNECT_TIMEOUT`].
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Build the handshake request with credentials and the optional request id.
    pub async fn build_request(
        &self,
        request_id: Option<&str>,
    ) -> RelayResult<http::Request<()>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| RelayError::InvalidConfiguration(format!("Invalid upstream URL: {e}")))?;

        let headers = request.headers_mut();
        if let Some(request_id) = request_id {
            match HeaderValue::from_str(request_id) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
                }
                Err(_) => debug!("Ignoring request id that is not a valid header value"),
            }
        }

        self.credential
            .apply(COGNITIVE_SERVICES_SCOPE, headers)
            .await
            .map_err(|e| RelayError::AuthenticationFailed(e.to_string()))?;

        Ok(request)
    }

    /// Open an authenticated socket to the upstream service.
    ///
    /// The token lookup and the handshake share one timeout.
    pub async fn connect(&self, request_id: Option<&str>) -> RelayResult<UpstreamSocket> {
        let connect = async {
            let request = self.build_request(request_id).await?;

            info!(url = %self.url, "Connecting to upstream realtime service");

            let config = WebSocketConfig::default().max_message_size(Some(MAX_WS_MESSAGE_SIZE));
            tokio_tungstenite::connect_async_with_config(request, Some(config), false)
                .await
                .map_err(classify_handshake_error)
        };

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                RelayError::ConnectionFailed(format!(
                    "Connection timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;

        info!("Connected to upstream realtime service");
        Ok(socket)
    }
}

fn classify_handshake_error(err: tungstenite::Error) -> RelayError {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            RelayError::AuthenticationFailed(format!(
                "Upstream rejected credentials ({})",
                response.status()
            ))
        }
        other => RelayError::ConnectionFailed(other.to_string()),
    }
}

/// `<ws scheme>://<host>/openai/realtime?api-version=<v>&deployment=<d>`
pub fn realtime_url(endpoint: &str, deployment: &str, api_version: &str) -> RelayResult<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| RelayError::InvalidConfiguration(format!("Invalid endpoint {endpoint}: {e}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(RelayError::InvalidConfiguration(format!(
                "Unsupported endpoint scheme: {other}"
            )));
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        RelayError::InvalidConfiguration(format!("Cannot use {scheme} for {endpoint}"))
    })?;

    url.set_path(REALTIME_PATH);
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("api-version", api_version)
        .append_pair("deployment", deployment);

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::core::credentials::{CredentialError, StaticTokenProvider, TokenProvider};

    struct StalledTokenProvider;

    #[async_trait]
    impl TokenProvider for StalledTokenProvider {
        async fn token(&self, _scope: &str) -> Result<String, CredentialError> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_realtime_url_from_https_endpoint() {
        let url = realtime_url(
            "https://example.openai.azure.com/",
            "gpt-4o-realtime-preview",
            DEFAULT_API_VERSION,
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://example.openai.azure.com/openai/realtime?api-version=2024-10-01-preview&deployment=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_realtime_url_replaces_path_and_query() {
        let url = realtime_url("http://127.0.0.1:9000/some/path?x=1", "dep", "v1").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:9000/openai/realtime?api-version=v1&deployment=dep"
        );
    }

    #[test]
    fn test_realtime_url_rejects_bad_endpoints() {
        assert!(matches!(
            realtime_url("ftp://example.com", "d", "v"),
            Err(RelayError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            realtime_url("not a url", "d", "v"),
            Err(RelayError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_request_carries_api_key_and_request_id() {
        let connector = UpstreamConnector::new(
            "https://example.com",
            "dep",
            DEFAULT_API_VERSION,
            ServiceCredential::api_key("k1"),
        )
        .unwrap();

        let request = connector.build_request(Some("req-42")).await.unwrap();
        assert_eq!(request.headers().get("api-key").unwrap(), "k1");
        assert_eq!(request.headers().get(REQUEST_ID_HEADER).unwrap(), "req-42");
        assert!(request.headers().get("authorization").is_none());
        assert_eq!(request.uri().host(), Some("example.com"));
    }

    #[tokio::test]
    async fn test_request_carries_bearer_token() {
        let connector = UpstreamConnector::new(
            "https://example.com",
            "dep",
            DEFAULT_API_VERSION,
            ServiceCredential::bearer(Arc::new(StaticTokenProvider::new("tok"))),
        )
        .unwrap();

        let request = connector.build_request(None).await.unwrap();
        assert_eq!(request.headers().get("authorization").unwrap(), "Bearer tok");
        assert!(request.headers().get("api-key").is_none());
        assert!(request.headers().get(REQUEST_ID_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_connect_timeout_covers_token_lookup() {
        let connector = UpstreamConnector::new(
            "http://127.0.0.1:9",
            "dep",
            DEFAULT_API_VERSION,
            ServiceCredential::bearer(Arc::new(StalledTokenProvider)),
        )
        .unwrap()
        .with_connect_timeout(Duration::from_millis(100));

        let result = tokio::time::timeout(Duration::from_secs(5), connector.connect(None))
            .await
            .expect("connect was not bounded by its timeout");
        match result {
            Err(RelayError::ConnectionFailed(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected a timeout, got {:?}", other.map(|_| ())),
        }
    }
}
