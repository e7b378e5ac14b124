//! Perimeter logout
//!
//! Logout is a double hop: the perimeter logoff service drops its own session
//! cookie, then follows `returl` into Keycloak's RP-initiated logout, which
//! sends the user back to the application.

use tracing::info;

use crate::page::Page;

/// SiteMinder logoff endpoint in front of the identity provider
pub const DEFAULT_LOGOFF_URL: &str = "https://logon7.gov.bc.ca/clp-cgi/logoff.cgi";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutConfig {
    /// Perimeter logoff endpoint; `None` goes straight to the provider
    pub logoff_url: Option<String>,
    pub auth_server_url: String,
    pub realm: String,
    pub client_id: String,
    pub redirect_uri: String,
}

impl LogoutConfig {
    /// Keycloak end-session URL. The redirect URI and client id are appended
    /// verbatim; the whole URL is encoded once when it becomes `returl`.
    pub fn provider_logout_url(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/logout?post_logout_redirect_uri={}&client_id={}",
            self.auth_server_url.trim_end_matches('/'),
            self.realm,
            self.redirect_uri,
            self.client_id
        )
    }

    pub fn logout_url(&self) -> String {
        let provider = self.provider_logout_url();
        match self.logoff_url.as_deref() {
            Some(logoff) => {
                let sep = if logoff.contains('?') { '&' } else { '?' };
                format!(
                    "{logoff}{sep}retnow=1&returl={}",
                    urlencoding::encode(&provider)
                )
            }
            None => provider,
        }
    }
}

pub fn logout(page: &mut dyn Page, config: &LogoutConfig) {
    info!(
        realm = %config.realm,
        client_id = %config.client_id,
        perimeter = config.logoff_url.is_some(),
        "Logging out"
    );
    page.navigate(&config.logout_url());
}
