//! Keycloak client
//!
//! Implements the Authorization Code Flow with PKCE manually using reqwest.
//! [`KeycloakProvider`] holds the discovered realm endpoints and is shared by
//! every request; [`KeycloakSession`] is the per-page-load [`AuthClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::token::{CALLBACK_STORAGE_KEY, PendingLogin, StoredTokens, TOKENS_STORAGE_KEY};
use super::{
    AuthClient, AuthClientFactory, AuthEvent, InitOptions, LoginOptions, PkceMethod,
};
use crate::callback::{CallbackParameters, ResponseMode};
use crate::error::AuthError;
use crate::page::Page;

/// Used when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 300;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct KeycloakConfig {
    /// Keycloak base URL, without `/realms/...`
    pub auth_server_url: String,
    pub realm: String,
    pub client_id: String,
    /// Only for confidential clients
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
}

impl KeycloakConfig {
    pub fn issuer_url(&self) -> String {
        format!(
            "{}/realms/{}",
            self.auth_server_url.trim_end_matches('/'),
            self.realm
        )
    }
}

/// OIDC provider metadata (from .well-known/openid-configuration)
#[derive(Debug, Clone, Deserialize)]
struct OidcDiscovery {
    authorization_endpoint: String,
    token_endpoint: String,
    #[serde(default)]
    end_session_endpoint: Option<String>,
    issuer: String,
}

/// Token response from the OIDC provider
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Keycloak extension; 0 for offline tokens
    #[serde(default)]
    refresh_expires_in: Option<i64>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    session_state: Option<String>,
}

struct ProviderInner {
    config: KeycloakConfig,
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    end_session_endpoint: String,
    http_client: reqwest::Client,
}

/// Discovered Keycloak realm, cheap to clone.
#[derive(Clone)]
pub struct KeycloakProvider {
    inner: Arc<ProviderInner>,
    /// Used by sessions until `initialize` says otherwise
    response_mode: ResponseMode,
}

impl KeycloakProvider {
    /// Create a provider by performing discovery against the realm
    pub async fn discover(config: KeycloakConfig) -> Result<Self, AuthError> {
        let issuer_url = config.issuer_url();
        info!(issuer = %issuer_url, "Performing OIDC discovery");

        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Discovery(e.to_string()))?;

        let discovery_url = format!("{issuer_url}/.well-known/openid-configuration");

        let discovery: OidcDiscovery = http_client
            .get(&discovery_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Discovery(format!("fetch {discovery_url}: {e}")))?
            .json()
            .await
            .map_err(|e| AuthError::Discovery(format!("parse {discovery_url}: {e}")))?;

        let end_session_endpoint = discovery
            .end_session_endpoint
            .unwrap_or_else(|| format!("{issuer_url}/protocol/openid-connect/logout"));

        info!(
            authorization_endpoint = %discovery.authorization_endpoint,
            token_endpoint = %discovery.token_endpoint,
            end_session_endpoint = %end_session_endpoint,
            "OIDC discovery completed"
        );

        Ok(Self {
            inner: Arc::new(ProviderInner {
                config,
                issuer: discovery.issuer,
                authorization_endpoint: discovery.authorization_endpoint,
                token_endpoint: discovery.token_endpoint,
                end_session_endpoint,
                http_client,
            }),
            response_mode: ResponseMode::default(),
        })
    }

    pub fn with_response_mode(mut self, response_mode: ResponseMode) -> Self {
        self.response_mode = response_mode;
        self
    }

    pub fn session(&self) -> KeycloakSession {
        KeycloakSession {
            provider: self.clone(),
            tokens: None,
            response_mode: self.response_mode,
            pkce: true,
            events: Vec::new(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.inner.issuer
    }

    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    fn authorize_url(
        &self,
        pending: &PendingLogin,
        code_challenge: Option<&str>,
        idp_hint: &str,
        response_mode: ResponseMode,
    ) -> String {
        let config = &self.inner.config;
        let mut scopes: Vec<&str> = config.scopes.iter().map(String::as_str).collect();
        if !scopes.contains(&"openid") {
            scopes.insert(0, "openid");
        }
        let scope = scopes.join(" ");

        let mut params = vec![
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", pending.redirect_uri.as_str()),
            ("state", pending.state.as_str()),
            ("response_mode", response_mode.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("nonce", pending.nonce.as_str()),
        ];
        if let Some(challenge) = code_challenge {
            params.push(("code_challenge", challenge));
            params.push(("code_challenge_method", PkceMethod::S256.as_str()));
        }
        if !idp_hint.is_empty() {
            params.push(("kc_idp_hint", idp_hint));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        format!("{}?{}", self.inner.authorization_endpoint, query)
    }

    fn end_session_url(&self, redirect_uri: &str) -> String {
        format!(
            "{}?post_logout_redirect_uri={}&client_id={}",
            self.inner.end_session_endpoint,
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.inner.config.client_id)
        )
    }

    async fn token_request(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, String> {
        let config = &self.inner.config;
        let mut form: Vec<(&str, &str)> = grant.to_vec();
        form.push(("client_id", config.client_id.as_str()));
        if let Some(secret) = config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .inner
            .http_client
            .post(&self.inner.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("{status}: {body}"));
        }

        response
            .json()
            .await
            .map_err(|e| format!("invalid token response: {e}"))
    }
}

impl AuthClientFactory for KeycloakProvider {
    fn create(&self) -> Box<dyn AuthClient> {
        Box::new(self.session())
    }
}

/// Per-page-load Keycloak client.
pub struct KeycloakSession {
    provider: KeycloakProvider,
    tokens: Option<StoredTokens>,
    response_mode: ResponseMode,
    pkce: bool,
    events: Vec<AuthEvent>,
}

impl KeycloakSession {
    fn store(&mut self, page: &mut dyn Page, tokens: StoredTokens) -> Result<(), AuthError> {
        let raw = serde_json::to_string(&tokens).map_err(|e| AuthError::Storage(e.to_string()))?;
        page.storage_set(TOKENS_STORAGE_KEY, raw);
        self.tokens = Some(tokens);
        Ok(())
    }

    /// Load a session stored by a previous page load.
    fn restore(&mut self, page: &mut dyn Page, now: i64) -> bool {
        self.tokens = None;

        let Some(raw) = page.storage_get(TOKENS_STORAGE_KEY) else {
            return false;
        };

        let tokens: StoredTokens = match serde_json::from_str(&raw) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable stored session");
                page.storage_remove(TOKENS_STORAGE_KEY);
                return false;
            }
        };

        if tokens.is_refresh_expired(now) {
            debug!("Stored session can no longer be refreshed");
            page.storage_remove(TOKENS_STORAGE_KEY);
            return false;
        }

        if tokens.expires_within(now, 0) {
            self.events.push(AuthEvent::TokenExpired);
        }

        self.tokens = Some(tokens);
        true
    }

    async fn handle_callback(
        &mut self,
        page: &mut dyn Page,
        params: &CallbackParameters,
        code: &str,
        pending_raw: String,
        now: i64,
    ) -> Result<bool, AuthError> {
        page.storage_remove(CALLBACK_STORAGE_KEY);

        let pending: PendingLogin =
            serde_json::from_str(&pending_raw).map_err(|e| AuthError::Storage(e.to_string()))?;

        if pending.is_stale(now) {
            warn!("Pending login expired before the callback arrived");
            return Err(AuthError::MissingCallbackState);
        }

        if params.state.as_deref() != Some(pending.state.as_str()) {
            warn!("Callback state mismatch");
            return Err(AuthError::StateMismatch);
        }

        let mut grant = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", pending.redirect_uri.as_str()),
        ];
        if let Some(verifier) = pending.pkce_verifier.as_deref() {
            grant.push(("code_verifier", verifier));
        }

        let response = match self.provider.token_request(&grant).await {
            Ok(r) => r,
            Err(e) => {
                self.events.push(AuthEvent::AuthError(e.clone()));
                return Err(AuthError::TokenExchange(e));
            }
        };

        let claims = response
            .id_token
            .as_deref()
            .map(decode_id_token_claims)
            .transpose()?
            .unwrap_or_default();

        if let Some(nonce) = claims.nonce.as_deref()
            && nonce != pending.nonce
        {
            self.events
                .push(AuthEvent::AuthError("nonce mismatch".to_string()));
            return Err(AuthError::TokenExchange("ID token nonce mismatch".to_string()));
        }

        let tokens = tokens_from_response(response, claims.sub, None, now);
        info!(
            subject = ?tokens.subject,
            "User authenticated successfully"
        );
        self.store(page, tokens)?;
        self.events.push(AuthEvent::AuthSuccess);

        Ok(true)
    }
}

#[async_trait]
impl AuthClient for KeycloakSession {
    async fn initialize(
        &mut self,
        page: &mut dyn Page,
        options: &InitOptions,
    ) -> Result<bool, AuthError> {
        self.response_mode = options.response_mode;
        self.pkce = options.pkce_method.is_some();
        if options.check_login_iframe {
            debug!("check_login_iframe has no effect outside a browser");
        }

        let params = CallbackParameters::from_url(page.location(), options.response_mode);
        let now = chrono::Utc::now().timestamp();

        if let Some(error) = params.error.clone() {
            page.storage_remove(CALLBACK_STORAGE_KEY);
            self.events.push(AuthEvent::AuthError(error.clone()));
            return Err(AuthError::Provider {
                error,
                description: params.error_description.clone().unwrap_or_default(),
            });
        }

        let authenticated = match (params.code.as_deref(), page.storage_get(CALLBACK_STORAGE_KEY)) {
            (Some(code), Some(pending_raw)) => {
                self.handle_callback(page, &params, code, pending_raw, now)
                    .await?
            }
            (Some(_), None) => {
                // Reload of an already-consumed callback URL
                if !self.restore(page, now) {
                    return Err(AuthError::MissingCallbackState);
                }
                true
            }
            (None, _) => self.restore(page, now),
        };

        debug!(
            authenticated = authenticated,
            on_load = ?options.on_load,
            "Keycloak session initialized"
        );
        self.events.push(AuthEvent::Ready(authenticated));

        Ok(authenticated)
    }

    fn is_token_expired(&self, min_validity_secs: u64) -> bool {
        let now = chrono::Utc::now().timestamp();
        self.tokens
            .as_ref()
            .is_none_or(|t| t.expires_within(now, min_validity_secs))
    }

    async fn refresh_token(
        &mut self,
        page: &mut dyn Page,
        min_validity_secs: u64,
    ) -> Result<bool, AuthError> {
        let current = self.tokens.clone().ok_or(AuthError::NotAuthenticated)?;
        let now = chrono::Utc::now().timestamp();

        if !current.expires_within(now, min_validity_secs) {
            debug!("Token still valid, refresh skipped");
            return Ok(false);
        }

        let Some(refresh_token) = current.refresh_token.as_deref() else {
            self.clear_token(page);
            self.events.push(AuthEvent::AuthRefreshError);
            return Err(AuthError::Refresh("no refresh token".to_string()));
        };

        let grant = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        match self.provider.token_request(&grant).await {
            Ok(response) => {
                let tokens = tokens_from_response(response, None, Some(&current), now);
                self.store(page, tokens)?;
                self.events.push(AuthEvent::AuthRefreshSuccess);
                debug!(subject = ?current.subject, "Token refreshed");
                Ok(true)
            }
            Err(e) => {
                self.clear_token(page);
                self.events.push(AuthEvent::AuthRefreshError);
                Err(AuthError::Refresh(e))
            }
        }
    }

    fn redirect_to_login(
        &mut self,
        page: &mut dyn Page,
        options: &LoginOptions,
    ) -> Result<(), AuthError> {
        let (pkce_verifier, code_challenge) = if self.pkce {
            let (verifier, challenge) = generate_pkce();
            (Some(verifier), Some(challenge))
        } else {
            (None, None)
        };

        let pending = PendingLogin {
            state: generate_random_string(32),
            nonce: generate_random_string(32),
            pkce_verifier,
            redirect_uri: options.redirect_uri.clone(),
            created_at: chrono::Utc::now().timestamp(),
        };

        let url = self.provider.authorize_url(
            &pending,
            code_challenge.as_deref(),
            &options.idp_hint,
            self.response_mode,
        );

        let raw = serde_json::to_string(&pending).map_err(|e| AuthError::Storage(e.to_string()))?;
        page.storage_set(CALLBACK_STORAGE_KEY, raw);
        page.navigate(&url);

        Ok(())
    }

    fn redirect_to_logout(
        &mut self,
        page: &mut dyn Page,
        redirect_uri: &str,
    ) -> Result<(), AuthError> {
        let url = self.provider.end_session_url(redirect_uri);
        self.clear_token(page);
        self.events.push(AuthEvent::AuthLogout);
        page.navigate(&url);
        Ok(())
    }

    fn clear_token(&mut self, page: &mut dyn Page) {
        self.tokens = None;
        page.storage_remove(TOKENS_STORAGE_KEY);
    }

    fn take_events(&mut self) -> Vec<AuthEvent> {
        std::mem::take(&mut self.events)
    }

    fn subject(&self) -> Option<&str> {
        self.tokens.as_ref().and_then(|t| t.subject.as_deref())
    }
}

fn tokens_from_response(
    response: TokenResponse,
    subject: Option<String>,
    previous: Option<&StoredTokens>,
    now: i64,
) -> StoredTokens {
    let expires_in = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
    let refresh_expires_at = response
        .refresh_expires_in
        .filter(|secs| *secs > 0)
        .map(|secs| now + secs);

    StoredTokens {
        refresh_token: response
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
        expires_at: now + expires_in,
        refresh_expires_at,
        subject: subject.or_else(|| previous.and_then(|p| p.subject.clone())),
        session_state: response
            .session_state
            .or_else(|| previous.and_then(|p| p.session_state.clone())),
    }
}

/// ID token claims the client cares about
#[derive(Debug, Default, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
}

/// Decode JWT payload without signature verification (the token came straight
/// from the token endpoint over TLS)
fn decode_id_token_claims(id_token: &str) -> Result<IdTokenClaims, AuthError> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::TokenExchange(format!(
            "invalid JWT format: expected 3 parts, got {}",
            parts.len()
        )));
    }

    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| AuthError::TokenExchange(format!("JWT payload is not base64: {e}")))?;

    serde_json::from_slice(&payload)
        .map_err(|e| AuthError::TokenExchange(format!("invalid ID token claims: {e}")))
}

/// Generate PKCE verifier and challenge (S256)
fn generate_pkce() -> (String, String) {
    let verifier = generate_random_string(48);

    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());

    (verifier, challenge)
}

/// Generate a cryptographically random URL-safe string
fn generate_random_string(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}
