//! WebSocket upgrade handshake and one-time auth tokens.
//!
//! Two request paths are accepted:
//!
//! ```text
//! /browser_ws?auth_token=<tok>
//! /mesh_ws?auth_token=<tok>&esp_id=<n>
//! ```
//!
//! The token must match the single outstanding token handed out by the
//! captive-portal login. A successful match consumes it.

use crate::{ClientRecord, ConnectionId, PeerKind, SessionError};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Browser upgrade path
pub const BROWSER_PATH: &str = "/browser_ws";
/// Mesh peer upgrade path
pub const MESH_PATH: &str = "/mesh_ws";
/// Default token length
pub const DEFAULT_TOKEN_LEN: usize = 32;

/// A parsed upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Token presented by the client
    pub token: String,
    /// Client kind derived from the path
    pub kind: PeerKind,
}

/// Parse an upgrade request URI
pub fn parse_handshake_uri(uri: &str) -> Result<HandshakeRequest, SessionError> {
    let (path, query) = uri.split_once('?').unwrap_or((uri, ""));

    let mut token = None;
    let mut esp_id = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("auth_token", value)) => token = Some(value.to_string()),
            Some(("esp_id", value)) => esp_id = Some(value),
            _ => {}
        }
    }

    let token = token.ok_or_else(|| SessionError::Handshake("missing auth_token".into()))?;

    let kind = if path.ends_with(BROWSER_PATH) {
        PeerKind::Browser
    } else if path.ends_with(MESH_PATH) {
        let esp_id = esp_id
            .ok_or_else(|| SessionError::Handshake("mesh client without esp_id".into()))?;
        let id = esp_id
            .parse::<u8>()
            .map_err(|_| SessionError::Handshake(format!("invalid esp_id `{}`", esp_id)))?;
        PeerKind::MeshPeer(id)
    } else {
        return Err(SessionError::Handshake(format!("unknown path `{}`", path)));
    };

    Ok(HandshakeRequest { token, kind })
}

/// Issues and redeems the single outstanding auth token
#[derive(Debug)]
pub struct TokenIssuer {
    current: Mutex<Option<String>>,
    token_len: usize,
}

impl TokenIssuer {
    /// Create an issuer producing tokens of `token_len` characters
    pub fn new(token_len: usize) -> Self {
        Self {
            current: Mutex::new(None),
            token_len,
        }
    }

    /// Generate a fresh token, replacing any outstanding one
    pub async fn issue(&self) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.token_len)
            .map(char::from)
            .collect();
        *self.current.lock().await = Some(token.clone());
        debug!("Issued auth token");
        token
    }

    /// Consume the outstanding token if `token` matches it
    pub async fn redeem(&self, token: &str) -> bool {
        let mut current = self.current.lock().await;
        match current.as_deref() {
            Some(expected) if !token.is_empty() && expected == token => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    /// Validate an upgrade request and build the client record for it
    pub async fn accept(
        &self,
        connection: ConnectionId,
        uri: &str,
    ) -> Result<ClientRecord, SessionError> {
        let request = parse_handshake_uri(uri)?;
        if !self.redeem(&request.token).await {
            warn!("Rejected handshake on {}: token mismatch", connection);
            return Err(SessionError::Handshake("token mismatch".into()));
        }

        Ok(ClientRecord {
            connection,
            token: request.token,
            kind: request.kind,
        })
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_paths() {
        let browser = parse_handshake_uri("/browser_ws?auth_token=abc123").unwrap();
        assert_eq!(browser.kind, PeerKind::Browser);
        assert_eq!(browser.token, "abc123");

        let mesh = parse_handshake_uri("/mesh_ws?auth_token=xyz&esp_id=7").unwrap();
        assert_eq!(mesh.kind, PeerKind::MeshPeer(7));

        assert!(parse_handshake_uri("/mesh_ws?auth_token=xyz").is_err());
        assert!(parse_handshake_uri("/mesh_ws?auth_token=xyz&esp_id=300").is_err());
        assert!(parse_handshake_uri("/other_ws?auth_token=xyz").is_err());
        assert!(parse_handshake_uri("/browser_ws").is_err());
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let issuer = TokenIssuer::new(16);
        let token = issuer.issue().await;
        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));

        let uri = format!("/browser_ws?auth_token={}", token);
        let record = issuer.accept(ConnectionId(1), &uri).await.unwrap();
        assert_eq!(record.kind, PeerKind::Browser);

        assert!(issuer.accept(ConnectionId(2), &uri).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_and_wrong_tokens_rejected() {
        let issuer = TokenIssuer::default();
        // nothing issued yet
        assert!(!issuer.redeem("").await);

        let token = issuer.issue().await;
        assert!(!issuer.redeem("").await);
        assert!(!issuer.redeem("wrong").await);

        // a newer token replaces the outstanding one
        let newer = issuer.issue().await;
        assert_ne!(token, newer);
        assert!(!issuer.redeem(&token).await);
        assert!(issuer.redeem(&newer).await);
    }
}
