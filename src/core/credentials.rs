//! Credentials for the upstream realtime service and the knowledge base.
//!
//! Exactly one [`ServiceCredential`] strategy is chosen at startup: a static
//! API key sent as an `api-key` header, or a bearer token obtained from a
//! [`TokenProvider`] just before each request or handshake.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::HeaderMap;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

/// Token scope for the realtime service.
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// Token scope for the knowledge-base service.
pub const SEARCH_SCOPE: &str = "https://search.azure.com/.default";

/// Default OAuth2 authority for client-credentials grants.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

const API_KEY_HEADER: HeaderName = HeaderName::from_static("api-key");

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: u64 = 60;

/// Shortest time a token is kept before it is requested again.
const MIN_TOKEN_LIFETIME: u64 = 60;

/// Upper bound for one token request, including connect.
pub const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CredentialError {
    /// The token endpoint could not be reached or rejected the request
    #[error("Token request failed: {0}")]
    TokenRequest(String),

    /// The credential cannot be expressed as an HTTP header
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),
}

/// Source of bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self, scope: &str) -> Result<String, CredentialError>;
}

/// Always returns the same token.
pub struct StaticTokenProvider {
    token: Zeroizing<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Zeroizing::new(token.into()),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self, _scope: &str) -> Result<String, CredentialError> {
        Ok(self.token.to_string())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: Zeroizing<String>,
    refresh_at: Instant,
}

impl CachedToken {
    fn new(access_token: String, expires_in: u64) -> Self {
        // Never outlive the token itself, even when it is shorter than the minimum
        let lifetime = expires_in
            .saturating_sub(EXPIRY_MARGIN)
            .max(MIN_TOKEN_LIFETIME.min(expires_in));
        Self {
            access_token: Zeroizing::new(access_token),
            refresh_at: Instant::now() + Duration::from_secs(lifetime),
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.refresh_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    expires_in: u64,
}

/// OAuth2 client-credentials grant against a Microsoft identity tenant.
///
/// Tokens are cached per scope until shortly before they expire.
pub struct ClientCredentialsTokenProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Zeroizing<String>,
    request_timeout: Duration,
    cache: Mutex<HashMap<String, CachedToken>>,
}

impl ClientCredentialsTokenProvider {
    pub fn new(
        http: reqwest::Client,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self::with_authority(http, DEFAULT_AUTHORITY, tenant_id, client_id, client_secret)
    }

    /// Use a different authority host, e.g. a sovereign cloud.
    pub fn with_authority(
        http: reqwest::Client,
        authority: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                authority.trim_end_matches('/'),
                tenant_id
            ),
            client_id: client_id.into(),
            client_secret: Zeroizing::new(client_secret.into()),
            request_timeout: TOKEN_REQUEST_TIMEOUT,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Override [`TOKEN_REQUEST_TIMEOUT`].
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn cached(&self, scope: &str) -> Option<String> {
        let cache = self.cache.lock();
        cache
            .get(scope)
            .filter(|token| !token.is_expired())
            .map(|token| token.access_token.to_string())
    }

    async fn fetch(&self, scope: &str) -> Result<CachedToken, CredentialError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("scope", scope)
            .finish();

        let response = self
            .http
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| CredentialError::TokenRequest(format!("Failed to request token: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CredentialError::TokenRequest(format!(
                "Token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::TokenRequest(format!("Failed to parse token: {e}")))?;

        Ok(CachedToken::new(token.access_token, token.expires_in))
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn token(&self, scope: &str) -> Result<String, CredentialError> {
        if let Some(token) = self.cached(scope) {
            return Ok(token);
        }

        debug!(scope = %scope, "Requesting client-credentials token");
        let fresh = self.fetch(scope).await?;
        let access_token = fresh.access_token.to_string();
        self.cache.lock().insert(scope.to_string(), fresh);
        Ok(access_token)
    }
}

/// How a request to a backing service is authenticated.
#[derive(Clone)]
pub enum ServiceCredential {
    /// Static key sent as the `api-key` header.
    ApiKey(Arc<Zeroizing<String>>),
    /// Bearer token from a provider.
    Bearer(Arc<dyn TokenProvider>),
}

impl ServiceCredential {
    pub fn api_key(key: impl Into<String>) -> Self {
        ServiceCredential::ApiKey(Arc::new(Zeroizing::new(key.into())))
    }

    pub fn bearer(provider: Arc<dyn TokenProvider>) -> Self {
        ServiceCredential::Bearer(provider)
    }

    /// Insert the authentication header for `scope` into `headers`.
    pub async fn apply(&self, scope: &str, headers: &mut HeaderMap) -> Result<(), CredentialError> {
        match self {
            ServiceCredential::ApiKey(key) => {
                let value = HeaderValue::from_str(key.as_str())
                    .map_err(|e| CredentialError::InvalidCredential(e.to_string()))?;
                headers.insert(API_KEY_HEADER, value);
            }
            ServiceCredential::Bearer(provider) => {
                let token = provider.token(scope).await?;
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| CredentialError::InvalidCredential(e.to_string()))?;
                headers.insert(AUTHORIZATION, value);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCredential::ApiKey(_) => f.write_str("ApiKey(***)"),
            ServiceCredential::Bearer(_) => f.write_str("Bearer(<provider>)"),
        }
    }
}
