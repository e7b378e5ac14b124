//! Client state persisted in page storage between page loads

use serde::{Deserialize, Serialize};

/// Storage key for the login in flight
pub const CALLBACK_STORAGE_KEY: &str = "kc-callback";

/// Storage key for the established session
pub const TOKENS_STORAGE_KEY: &str = "kc-tokens";

/// Written by `redirect_to_login`, consumed by the callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLogin {
    /// OIDC `state` parameter
    pub state: String,
    pub nonce: String,
    /// Absent when PKCE is disabled
    pub pkce_verifier: Option<String>,
    /// Must match on the token request
    pub redirect_uri: String,
    pub created_at: i64,
}

impl PendingLogin {
    /// Pending logins older than this are ignored.
    pub const MAX_AGE_SECS: i64 = 600;

    pub fn is_stale(&self, now: i64) -> bool {
        now - self.created_at > Self::MAX_AGE_SECS
    }
}

/// Session kept by the client. The access token itself is not stored; only
/// its expiry matters to the bootstrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTokens {
    pub refresh_token: Option<String>,
    /// Access token expiry (Unix timestamp)
    pub expires_at: i64,
    /// Refresh token expiry; `None` if the provider did not say
    pub refresh_expires_at: Option<i64>,
    pub subject: Option<String>,
    pub session_state: Option<String>,
}

impl StoredTokens {
    /// True if the access token expires within `min_validity_secs`.
    pub fn expires_within(&self, now: i64, min_validity_secs: u64) -> bool {
        let min_validity = i64::try_from(min_validity_secs).unwrap_or(i64::MAX);
        self.expires_at.saturating_sub(now) < min_validity
    }

    /// True if no refresh is possible anymore.
    pub fn is_refresh_expired(&self, now: i64) -> bool {
        match (&self.refresh_token, self.refresh_expires_at) {
            (None, _) => now >= self.expires_at,
            (Some(_), Some(at)) => now >= at,
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(expires_at: i64, refresh_expires_at: Option<i64>) -> StoredTokens {
        StoredTokens {
            refresh_token: Some("refresh".to_string()),
            expires_at,
            refresh_expires_at,
            subject: Some("user-123".to_string()),
            session_state: Some("SS1".to_string()),
        }
    }

    #[test]
    fn test_expires_within_leeway() {
        let t = tokens(1_000, None);
        assert!(!t.expires_within(900, 30));
        assert!(!t.expires_within(970, 30));
        assert!(t.expires_within(971, 30));
        assert!(t.expires_within(1_500, 0));
    }

    #[test]
    fn test_expires_within_huge_leeway() {
        let t = tokens(1_000, None);
        assert!(t.expires_within(900, u64::MAX));
        assert!(t.expires_within(900, i64::MAX as u64 + 1));
        assert!(!tokens(i64::MAX, None).expires_within(i64::MIN, 30));
    }

    #[test]
    fn test_refresh_expired() {
        assert!(!tokens(1_000, Some(2_000)).is_refresh_expired(1_500));
        assert!(tokens(1_000, Some(2_000)).is_refresh_expired(2_000));
        assert!(!tokens(1_000, None).is_refresh_expired(50_000));

        let mut no_refresh = tokens(1_000, None);
        no_refresh.refresh_token = None;
        assert!(no_refresh.is_refresh_expired(1_000));
        assert!(!no_refresh.is_refresh_expired(999));
    }

    #[test]
    fn test_tokens_serialize_deserialize() {
        let json = serde_json::to_string(&tokens(1_000, Some(2_000))).unwrap();
        let back: StoredTokens = serde_json::from_str(&json).unwrap();
        assert_eq!(back.expires_at, 1_000);
        assert_eq!(back.subject.as_deref(), Some("user-123"));
    }

    #[test]
    fn test_pending_login_stale() {
        let pending = PendingLogin {
            state: "s".to_string(),
            nonce: "n".to_string(),
            pkce_verifier: Some("v".to_string()),
            redirect_uri: "https://app.example/auth/callback".to_string(),
            created_at: 1_000,
        };
        assert!(!pending.is_stale(1_600));
        assert!(pending.is_stale(1_601));
    }
}
