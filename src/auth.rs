//! Pluggable token validation (spec §4.7, "External interfaces").
//! `AuthProvider` is the only contract the core depends on; everything
//! else (JWT, sessions, OAuth) lives outside this crate.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An authenticated user, distinct from the anonymous [`crate::protocol::User`]
/// so handlers can tell "has a verified identity" from "has a session".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl From<AuthUser> for crate::protocol::User {
    fn from(user: AuthUser) -> Self {
        crate::protocol::User {
            id: user.id,
            name: user.name,
            metadata: user.metadata,
        }
    }
}

/// Token-based authentication. Implementations back JWTs, session stores,
/// API keys, or OAuth introspection; the core never inspects the token
/// format itself.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthUser>, crate::errors::AuthError>;

    /// Alias kept for the common case of swapping this crate's own
    /// `NoAuthProvider` for a real one without a call-site rename.
    async fn validate_token(&self, token: &str) -> Result<Option<AuthUser>, crate::errors::AuthError> {
        self.authenticate(token).await
    }

    async fn get_user_roles(&self, _user_id: &str, _room_id: &str) -> Vec<String> {
        Vec::new()
    }

    async fn on_connect(&self, _user: &AuthUser) {}
    async fn on_disconnect(&self, _user: &AuthUser) {}
}

/// No-op provider for development: accepts any non-empty token as a user
/// id. Logs a warning exactly once per process (Design Note 9's "class
/// level already-warned boolean" becomes a process-wide atomic flag).
pub struct NoAuthProvider {
    warned: AtomicBool,
}

impl Default for NoAuthProvider {
    fn default() -> Self {
        Self {
            warned: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AuthProvider for NoAuthProvider {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthUser>, crate::errors::AuthError> {
        if !self.warned.swap(true, Ordering::Relaxed) {
            log::warn!(
                "NoAuthProvider is enabled - this is insecure and should only be used for development. \
                 All users authenticate with no role grants."
            );
        }
        if token.is_empty() {
            return Ok(None);
        }
        let boundary = token.char_indices().nth(8).map(|(i, _)| i).unwrap_or(token.len());
        let label = &token[..boundary];
        Ok(Some(AuthUser {
            id: token.to_string(),
            name: format!("User {label}"),
            email: None,
            roles: Vec::new(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_empty_token() {
        let provider = NoAuthProvider::default();
        assert!(provider.authenticate("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accepts_any_nonempty_token() {
        let provider = NoAuthProvider::default();
        let user = provider.authenticate("sometoken").await.unwrap().unwrap();
        assert_eq!(user.id, "sometoken");
    }

    #[tokio::test]
    async fn warns_only_once() {
        let provider = NoAuthProvider::default();
        provider.authenticate("a").await.unwrap();
        assert!(provider.warned.load(Ordering::Relaxed));
        provider.authenticate("b").await.unwrap();
    }

    #[tokio::test]
    async fn multi_byte_token_does_not_panic_on_truncation() {
        let provider = NoAuthProvider::default();
        let token = "\u{6f22}".repeat(9); // 9 three-byte characters, byte index 8 lands mid-character
        let user = provider.authenticate(&token).await.unwrap().unwrap();
        assert!(user.name.starts_with("User "));
    }
}
