use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::auth::keycloak::KeycloakConfig;
use crate::auth::{LoginOptions, OnLoad};
use crate::bootstrap::BootstrapSettings;
use crate::callback::ResponseMode;
use crate::cookies::{CookiePolicy, CookieWritePolicy, parse_same_site};
use crate::logout::{DEFAULT_LOGOFF_URL, LogoutConfig};

// ============================================
// Environment variable name constants
// ============================================
pub mod env {
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const HEALTH_PORT: &str = "HEALTH_PORT";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const SSO_AUTH_SERVER_URL: &str = "SSO_AUTH_SERVER_URL";
    pub const SSO_REALM: &str = "SSO_REALM";
    pub const SSO_CLIENT_ID: &str = "SSO_CLIENT_ID";
    pub const SSO_CLIENT_SECRET: &str = "SSO_CLIENT_SECRET";
    pub const SSO_REDIRECT_URI: &str = "SSO_REDIRECT_URI";
    pub const SSO_SCOPES: &str = "SSO_SCOPES";
    pub const SSO_IDP_HINT: &str = "SSO_IDP_HINT";
    pub const SSO_ON_LOAD: &str = "SSO_ON_LOAD";
    pub const SSO_RESPONSE_MODE: &str = "SSO_RESPONSE_MODE";
    pub const SSO_LANDING_PATH: &str = "SSO_LANDING_PATH";
    pub const SSO_DASHBOARD_PATH: &str = "SSO_DASHBOARD_PATH";
    pub const SSO_LOGOFF_URL: &str = "SSO_LOGOFF_URL";
    pub const SSO_TOKEN_MIN_VALIDITY: &str = "SSO_TOKEN_MIN_VALIDITY";
    pub const SSO_REFRESH_ON_LOAD: &str = "SSO_REFRESH_ON_LOAD";
    pub const SSO_COOKIE_WRITE: &str = "SSO_COOKIE_WRITE";
    pub const SSO_COOKIE_SECURE: &str = "SSO_COOKIE_SECURE";
    pub const SSO_COOKIE_HTTP_ONLY: &str = "SSO_COOKIE_HTTP_ONLY";
    pub const SSO_COOKIE_SAME_SITE: &str = "SSO_COOKIE_SAME_SITE";
    pub const SSO_COOKIE_MAX_AGE: &str = "SSO_COOKIE_MAX_AGE";
    pub const COOKIE_SECRET: &str = "COOKIE_SECRET";
    pub const SSO_LOCAL_BYPASS: &str = "SSO_LOCAL_BYPASS";
}

/// Minimum length of `COOKIE_SECRET` in bytes
pub const MIN_COOKIE_SECRET_LEN: usize = 64;

/// Routes served by the application itself
const RESERVED_PATHS: &[&str] = &["/", "/auth/login", "/auth/callback", "/auth/logout", "/healthz"];

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show version information
    Version,
    /// Print the logout URL for the configured realm
    LogoutUrl,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "kc-bootstrap",
    version,
    about = "Keycloak session bootstrapper",
    long_about = "Runs the Keycloak login round-trip for a web application: redirects to the identity provider, mirrors the callback parameters into cookies, lands users on the dashboard and chains the perimeter logoff into Keycloak logout."
)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Log format: json or pretty
    #[arg(long, env = env::LOG_FORMAT, default_value = "json")]
    pub log_format: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = env::LOG_LEVEL, default_value = "info")]
    pub log_level: String,

    /// Health check server port
    #[arg(long, env = env::HEALTH_PORT, default_value = "8080")]
    pub health_port: u16,

    /// Application server port
    #[arg(long, env = env::SERVER_PORT, default_value = "3000")]
    pub server_port: u16,

    // ============================================
    // Identity provider
    // ============================================
    /// Keycloak base URL, e.g. https://sso.example.com/auth
    #[arg(long, env = env::SSO_AUTH_SERVER_URL)]
    pub auth_server_url: Option<String>,

    #[arg(long, env = env::SSO_REALM)]
    pub realm: Option<String>,

    #[arg(long, env = env::SSO_CLIENT_ID)]
    pub client_id: Option<String>,

    /// Client secret (confidential clients only)
    #[arg(long, env = env::SSO_CLIENT_SECRET, hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Callback URL registered for the client
    #[arg(long, env = env::SSO_REDIRECT_URI)]
    pub redirect_uri: Option<String>,

    /// Requested scopes, comma-separated
    #[arg(long, env = env::SSO_SCOPES, value_delimiter = ',', default_value = "openid")]
    pub scopes: Vec<String>,

    /// Identity provider hint (kc_idp_hint), empty for none
    #[arg(long, env = env::SSO_IDP_HINT, default_value = "")]
    pub idp_hint: String,

    /// On-load behavior: login-required or check-sso
    #[arg(long, env = env::SSO_ON_LOAD, value_enum)]
    pub on_load: Option<OnLoad>,

    /// Where callback parameters are read from: query or fragment
    #[arg(long, env = env::SSO_RESPONSE_MODE, value_enum, default_value = "query")]
    pub response_mode: ResponseMode,

    // ============================================
    // Routing
    // ============================================
    /// Landing page for unauthenticated visitors
    #[arg(long, env = env::SSO_LANDING_PATH)]
    pub landing_path: Option<String>,

    #[arg(long, env = env::SSO_DASHBOARD_PATH, default_value = "/dashboard")]
    pub dashboard_path: String,

    /// Perimeter logoff endpoint, empty to go straight to Keycloak
    #[arg(long, env = env::SSO_LOGOFF_URL, default_value = DEFAULT_LOGOFF_URL)]
    pub logoff_url: String,

    // ============================================
    // Token handling
    // ============================================
    /// Seconds of remaining validity below which a token is refreshed
    #[arg(long, env = env::SSO_TOKEN_MIN_VALIDITY, default_value = "30")]
    pub token_min_validity: u64,

    /// Check token expiry right after initialization
    #[arg(long, env = env::SSO_REFRESH_ON_LOAD, default_value = "true", action = clap::ArgAction::Set)]
    pub refresh_on_load: bool,

    // ============================================
    // Cookies
    // ============================================
    /// Session cookie write policy: when-present or always
    #[arg(long, env = env::SSO_COOKIE_WRITE, value_enum, default_value = "when-present")]
    pub cookie_write: CookieWritePolicy,

    #[arg(long, env = env::SSO_COOKIE_SECURE, default_value = "true", action = clap::ArgAction::Set)]
    pub cookie_secure: bool,

    #[arg(long, env = env::SSO_COOKIE_HTTP_ONLY, default_value = "true", action = clap::ArgAction::Set)]
    pub cookie_http_only: bool,

    /// SameSite attribute: lax, strict or none
    #[arg(long, env = env::SSO_COOKIE_SAME_SITE, default_value = "lax")]
    pub cookie_same_site: String,

    /// Session cookie Max-Age in seconds, unset for session cookies
    #[arg(long, env = env::SSO_COOKIE_MAX_AGE)]
    pub cookie_max_age: Option<i64>,

    /// Key material for the encrypted storage cookie, generated if unset
    #[arg(long, env = env::COOKIE_SECRET, hide_env_values = true)]
    pub cookie_secret: Option<String>,

    /// Trust the state cookie on localhost (development only)
    #[arg(long, env = env::SSO_LOCAL_BYPASS, default_value = "false", action = clap::ArgAction::Set)]
    pub local_bypass: bool,
}

impl Config {
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// Validate required settings and value formats
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            (env::SSO_AUTH_SERVER_URL, &self.auth_server_url),
            (env::SSO_REALM, &self.realm),
            (env::SSO_CLIENT_ID, &self.client_id),
            (env::SSO_REDIRECT_URI, &self.redirect_uri),
            (env::SSO_LANDING_PATH, &self.landing_path),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.as_ref().is_none_or(|s| s.is_empty()))
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(format!("missing required settings: {}", missing.join(", ")));
        }

        self.validate_logout()?;

        url::Url::parse(self.get_redirect_uri())
            .map_err(|e| format!("{}: {e}", env::SSO_REDIRECT_URI))?;

        // Fragments never reach the server
        if self.response_mode == ResponseMode::Fragment {
            return Err(format!(
                "{} '{}' is not supported by the server, use '{}'",
                env::SSO_RESPONSE_MODE,
                ResponseMode::Fragment,
                ResponseMode::Query
            ));
        }

        if i64::try_from(self.token_min_validity).is_err() {
            return Err(format!(
                "{} must be at most {} seconds",
                env::SSO_TOKEN_MIN_VALIDITY,
                i64::MAX
            ));
        }

        for (name, path) in [
            (env::SSO_LANDING_PATH, self.get_landing_path()),
            (env::SSO_DASHBOARD_PATH, self.dashboard_path.as_str()),
        ] {
            if !path.starts_with('/') {
                return Err(format!("{name} must be an absolute path, got '{path}'"));
            }
        }

        if RESERVED_PATHS.contains(&self.dashboard_path.as_str()) {
            return Err(format!(
                "{} '{}' collides with a built-in route",
                env::SSO_DASHBOARD_PATH,
                self.dashboard_path
            ));
        }

        parse_same_site(&self.cookie_same_site)
            .map_err(|e| format!("{}: {e}", env::SSO_COOKIE_SAME_SITE))?;

        if let Some(secret) = &self.cookie_secret
            && secret.len() < MIN_COOKIE_SECRET_LEN
        {
            return Err(format!(
                "{} must be at least {MIN_COOKIE_SECRET_LEN} bytes",
                env::COOKIE_SECRET
            ));
        }

        Ok(())
    }

    /// Validate only what the logout URL needs
    pub fn validate_logout(&self) -> Result<(), String> {
        let required = [
            (env::SSO_AUTH_SERVER_URL, &self.auth_server_url),
            (env::SSO_REALM, &self.realm),
            (env::SSO_CLIENT_ID, &self.client_id),
            (env::SSO_REDIRECT_URI, &self.redirect_uri),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.as_ref().is_none_or(|s| s.is_empty()))
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(format!("missing required settings: {}", missing.join(", ")));
        }

        if let Some(url) = self.get_logoff_url() {
            url::Url::parse(url).map_err(|e| format!("{}: {e}", env::SSO_LOGOFF_URL))?;
        }

        Ok(())
    }

    pub fn get_landing_path(&self) -> &str {
        self.landing_path.as_deref().unwrap_or("/")
    }

    pub fn get_redirect_uri(&self) -> &str {
        self.redirect_uri.as_deref().unwrap_or("")
    }

    pub fn get_realm(&self) -> &str {
        self.realm.as_deref().unwrap_or("")
    }

    /// `None` when the perimeter hop is disabled
    pub fn get_logoff_url(&self) -> Option<&str> {
        Some(self.logoff_url.trim()).filter(|s| !s.is_empty())
    }

    pub fn keycloak_config(&self) -> KeycloakConfig {
        KeycloakConfig {
            auth_server_url: self.auth_server_url.clone().unwrap_or_default(),
            realm: self.get_realm().to_string(),
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret: self.client_secret.clone().filter(|s| !s.is_empty()),
            scopes: self
                .scopes
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn logout_config(&self) -> LogoutConfig {
        LogoutConfig {
            logoff_url: self.get_logoff_url().map(str::to_string),
            auth_server_url: self.auth_server_url.clone().unwrap_or_default(),
            realm: self.get_realm().to_string(),
            client_id: self.client_id.clone().unwrap_or_default(),
            redirect_uri: self.get_redirect_uri().to_string(),
        }
    }

    pub fn cookie_policy(&self) -> Result<CookiePolicy, String> {
        Ok(CookiePolicy {
            write: self.cookie_write,
            secure: self.cookie_secure,
            http_only: self.cookie_http_only,
            same_site: parse_same_site(&self.cookie_same_site)?,
            max_age_secs: self.cookie_max_age,
        })
    }

    pub fn bootstrap_settings(&self) -> Result<Arc<BootstrapSettings>, String> {
        Ok(Arc::new(BootstrapSettings {
            login: LoginOptions {
                redirect_uri: self.get_redirect_uri().to_string(),
                idp_hint: self.idp_hint.clone(),
            },
            dashboard_path: self.dashboard_path.clone(),
            landing_path: self.get_landing_path().to_string(),
            on_load: self.on_load,
            response_mode: self.response_mode,
            min_validity_secs: self.token_min_validity,
            refresh_on_load: self.refresh_on_load,
            cookies: self.cookie_policy()?,
            local_bypass: self.local_bypass,
            logout: self.logout_config(),
        }))
    }
}
