//! Upgrade-time authentication (§6): decodes a bearer token into an opaque
//! `userId`. Token issuance/validation is an external collaborator; this
//! module only defines the interface and a development default.

use axum::http::HeaderMap;
use serde::Deserialize;

use crate::error::{CoreError, CoreResult};

const SESSION_COOKIE: &str = "x-session-token";

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// Extracts the raw bearer token from the upgrade request's query string,
/// `x-session-token` cookie, or `Authorization: Bearer` header, in that
/// order. Returns `None` if none is present.
pub fn extract_token(query: &ConnectQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = &query.token {
        if !token.is_empty() {
            return Some(token.clone());
        }
    }

    if let Some(cookie_header) = headers.get(axum::http::header::COOKIE) {
        if let Ok(raw) = cookie_header.to_str() {
            for pair in raw.split(';') {
                let pair = pair.trim();
                if let Some(value) = pair.strip_prefix(&format!("{SESSION_COOKIE}=")) {
                    return Some(value.to_string());
                }
            }
        }
    }

    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(raw) = auth.to_str() {
            if let Some(token) = raw.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    None
}

/// Decodes a bearer token into the opaque `userId` it identifies. Real
/// deployments plug in their own verifier (JWT, session-store lookup, ...).
pub trait TokenAuthenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> CoreResult<String>;
}

/// Treats the token itself as the `userId`. Sufficient for local
/// development and for the test suite; production deployments must supply
/// a real [`TokenAuthenticator`].
#[derive(Default)]
pub struct OpaqueTokenAuthenticator;

impl TokenAuthenticator for OpaqueTokenAuthenticator {
    fn authenticate(&self, token: &str) -> CoreResult<String> {
        if token.is_empty() {
            return Err(CoreError::WebSocketAuthentication("empty token".into()));
        }
        Ok(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefers_query_token_over_header() {
        let query = ConnectQuery {
            token: Some("from-query".into()),
        };
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("from-query"));
    }

    #[test]
    fn falls_back_to_bearer_header() {
        let query = ConnectQuery { token: None };
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn falls_back_to_cookie() {
        let query = ConnectQuery { token: None };
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("other=1; x-session-token=cookie-tok; more=2"),
        );
        assert_eq!(extract_token(&query, &headers).as_deref(), Some("cookie-tok"));
    }

    #[test]
    fn missing_everywhere_is_none() {
        let query = ConnectQuery { token: None };
        assert_eq!(extract_token(&query, &HeaderMap::new()), None);
    }

    #[test]
    fn opaque_authenticator_rejects_empty() {
        let auth = OpaqueTokenAuthenticator;
        assert!(auth.authenticate("").is_err());
        assert_eq!(auth.authenticate("u1").unwrap(), "u1");
    }
}
