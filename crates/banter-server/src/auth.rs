//! Identity resolution for incoming connections.
//!
//! Authentication itself is external; the core only needs a stable user
//! identifier before a connection is admitted. Connections that cannot be
//! resolved to an identity are refused before the WebSocket upgrade, with no
//! payload exchanged.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;

/// An opaque identity provider.
///
/// Implementations map a bearer token to a stable user ID, or `None` for an
/// anonymous/unverifiable token.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a token to a user ID.
    async fn authenticate(&self, token: Option<&str>) -> Option<String>;
}

/// Development identity provider: the bearer token is the user ID.
#[derive(Debug, Default)]
pub struct TokenIdentity;

#[async_trait]
impl IdentityProvider for TokenIdentity {
    async fn authenticate(&self, token: Option<&str>) -> Option<String> {
        match token {
            Some(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
            _ => None,
        }
    }
}

/// Extract the bearer token from a request.
///
/// Checks the `Authorization: Bearer` header first, then the `token` query
/// parameter (browser WebSocket clients cannot set headers).
#[must_use]
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(text) = value.to_str() {
            if let Some(token) = text.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    query.get("token").cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[tokio::test]
    async fn test_token_identity() {
        let provider = TokenIdentity;
        assert_eq!(
            provider.authenticate(Some("alice")).await,
            Some("alice".to_string())
        );
        assert_eq!(provider.authenticate(Some("  ")).await, None);
        assert_eq!(provider.authenticate(None).await, None);
    }

    #[test]
    fn test_extract_token_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer alice".parse().unwrap());
        let query = HashMap::new();
        assert_eq!(extract_token(&headers, &query), Some("alice".to_string()));
    }

    #[test]
    fn test_extract_token_query_fallback() {
        let headers = HeaderMap::new();
        let mut query = HashMap::new();
        query.insert("token".to_string(), "bob".to_string());
        assert_eq!(extract_token(&headers, &query), Some("bob".to_string()));
    }

    #[test]
    fn test_extract_token_missing() {
        let headers = HeaderMap::new();
        let query = HashMap::new();
        assert_eq!(extract_token(&headers, &query), None);
    }
}
