//! Bearer credential state shared by the gateway and the live channel
//!
//! Constructed once at process start and passed by handle to everything that
//! talks to the tournament service; there is no process-wide singleton. A
//! 401-equivalent response invalidates the cached token so no caller retries
//! with a credential the service has already rejected.

use tokio::sync::RwLock;

/// Shared bearer-token holder
#[derive(Debug, Default)]
pub struct AuthState {
    token: RwLock<Option<String>>,
}

impl AuthState {
    /// Create an unauthenticated state
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state carrying an already-issued token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Current bearer token, if authenticated
    pub async fn bearer(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    /// Replace the cached token after a successful login
    pub async fn set_token(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    /// Drop the cached token (logout, or the service rejected it)
    pub async fn invalidate(&self) {
        *self.token.write().await = None;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }
}
