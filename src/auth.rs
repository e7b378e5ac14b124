//! Authentication client abstraction
//!
//! The bootstrapper talks to the identity provider only through
//! [`AuthClient`]. [`keycloak::KeycloakSession`] is the concrete client used
//! by the HTTP service: Authorization Code Flow with PKCE against a Keycloak
//! realm.

pub mod keycloak;
pub mod token;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::callback::ResponseMode;
use crate::error::AuthError;
use crate::page::Page;

/// What the client should do on load when no session exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnLoad {
    /// The caller redirects to login when initialization reports no session
    LoginRequired,
    /// Only report whether a session exists
    CheckSso,
}

impl std::fmt::Display for OnLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LoginRequired => write!(f, "login-required"),
            Self::CheckSso => write!(f, "check-sso"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    S256,
}

impl PkceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    pub pkce_method: Option<PkceMethod>,
    pub check_login_iframe: bool,
    pub on_load: Option<OnLoad>,
    pub response_mode: ResponseMode,
}

impl InitOptions {
    pub fn new(on_load: Option<OnLoad>, response_mode: ResponseMode) -> Self {
        Self {
            pkce_method: Some(PkceMethod::S256),
            check_login_iframe: false,
            on_load,
            response_mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOptions {
    pub redirect_uri: String,
    /// `kc_idp_hint`; empty means no hint
    pub idp_hint: String,
}

/// Notifications raised by a client, drained with [`AuthClient::take_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    Ready(bool),
    AuthSuccess,
    AuthError(String),
    AuthRefreshSuccess,
    AuthRefreshError,
    TokenExpired,
    AuthLogout,
}

#[async_trait]
pub trait AuthClient: Send {
    /// Restore or establish the session for this page load. `Ok(true)` means
    /// a valid session exists.
    async fn initialize(
        &mut self,
        page: &mut dyn Page,
        options: &InitOptions,
    ) -> Result<bool, AuthError>;

    /// True if the access token expires within `min_validity_secs`, or if
    /// there is no session.
    fn is_token_expired(&self, min_validity_secs: u64) -> bool;

    /// Refresh the token if it expires within `min_validity_secs`. `Ok(true)`
    /// if a refresh happened, `Ok(false)` if the token was still valid.
    async fn refresh_token(
        &mut self,
        page: &mut dyn Page,
        min_validity_secs: u64,
    ) -> Result<bool, AuthError>;

    /// Navigate to the identity provider's login page.
    fn redirect_to_login(
        &mut self,
        page: &mut dyn Page,
        options: &LoginOptions,
    ) -> Result<(), AuthError>;

    /// Navigate to the identity provider's logout endpoint.
    fn redirect_to_logout(&mut self, page: &mut dyn Page, redirect_uri: &str)
    -> Result<(), AuthError>;

    /// Forget the local session without contacting the provider.
    fn clear_token(&mut self, page: &mut dyn Page);

    fn take_events(&mut self) -> Vec<AuthEvent>;

    /// Subject of the current session, for logging.
    fn subject(&self) -> Option<&str> {
        None
    }
}

#[async_trait]
impl<C: AuthClient + ?Sized> AuthClient for Box<C> {
    async fn initialize(
        &mut self,
        page: &mut dyn Page,
        options: &InitOptions,
    ) -> Result<bool, AuthError> {
        (**self).initialize(page, options).await
    }

    fn is_token_expired(&self, min_validity_secs: u64) -> bool {
        (**self).is_token_expired(min_validity_secs)
    }

    async fn refresh_token(
        &mut self,
        page: &mut dyn Page,
        min_validity_secs: u64,
    ) -> Result<bool, AuthError> {
        (**self).refresh_token(page, min_validity_secs).await
    }

    fn redirect_to_login(
        &mut self,
        page: &mut dyn Page,
        options: &LoginOptions,
    ) -> Result<(), AuthError> {
        (**self).redirect_to_login(page, options)
    }

    fn redirect_to_logout(
        &mut self,
        page: &mut dyn Page,
        redirect_uri: &str,
    ) -> Result<(), AuthError> {
        (**self).redirect_to_logout(page, redirect_uri)
    }

    fn clear_token(&mut self, page: &mut dyn Page) {
        (**self).clear_token(page)
    }

    fn take_events(&mut self) -> Vec<AuthEvent> {
        (**self).take_events()
    }

    fn subject(&self) -> Option<&str> {
        (**self).subject()
    }
}

/// Creates one client per page load.
pub trait AuthClientFactory: Send + Sync {
    fn create(&self) -> Box<dyn AuthClient>;
}
