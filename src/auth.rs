//! Client authentication context and API secret matching.

use subtle::ConstantTimeEq;

use crate::config::AuthApiSecret;

/// Authentication context inserted into request extensions by the auth middleware.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Auth {
    /// Identifier of the API secret that matched, `None` when auth is disabled
    pub id: Option<String>,
}

impl Auth {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }

    /// Context for requests served without authentication.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.id.is_some()
    }
}

/// Return the id of the secret matching `token`.
///
/// Every entry is compared in constant time so the timing doesn't reveal
/// which secret, if any, matched.
pub fn match_api_secret_id<'a>(token: &str, secrets: &'a [AuthApiSecret]) -> Option<&'a str> {
    let mut found = None;
    for entry in secrets {
        let matches = bool::from(entry.secret.as_bytes().ct_eq(token.as_bytes()));
        if matches && found.is_none() {
            found = Some(entry.id.as_str());
        }
    }
    found
}
