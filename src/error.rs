//! Error types for the authentication client and bootstrapper.

use thiserror::Error;

/// Errors raised by an [`AuthClient`](crate::auth::AuthClient) or while
/// building page navigations.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    #[error("Identity provider returned error: {error} ({description})")]
    Provider { error: String, description: String },

    #[error("Callback state does not match the pending login")]
    StateMismatch,

    #[error("Callback received without a pending login")]
    MissingCallbackState,

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Stored auth state is corrupt: {0}")]
    Storage(String),
}

impl AuthError {
    pub fn invalid_url(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if the error came from the identity provider or token
    /// endpoint rather than from local state.
    pub const fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Discovery(_) | Self::Provider { .. } | Self::TokenExchange(_) | Self::Refresh(_)
        )
    }
}
