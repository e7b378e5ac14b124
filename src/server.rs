pub mod handlers;
pub mod page;
pub mod views;

use anyhow::{Context, Result};
use axum::{Router, extract::FromRef, routing::get};
use axum_extra::extract::cookie::Key;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::auth::AuthClientFactory;
use crate::auth::keycloak::KeycloakProvider;
use crate::bootstrap::BootstrapSettings;
use crate::config::Config;
use crate::health::HealthServer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<dyn AuthClientFactory>,
    pub settings: Arc<BootstrapSettings>,
    /// Scheme and host of the application, taken from the redirect URI
    pub origin: Url,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(
        factory: Arc<dyn AuthClientFactory>,
        settings: Arc<BootstrapSettings>,
        cookie_key: Key,
    ) -> Result<Self> {
        let origin = Url::parse(&settings.login.redirect_uri)
            .with_context(|| format!("invalid redirect URI '{}'", settings.login.redirect_uri))?;
        Ok(Self {
            factory,
            settings,
            origin,
            cookie_key,
        })
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Build the cookie encryption key from `COOKIE_SECRET`, or generate one.
/// A generated key does not survive restarts, so logins in flight are lost.
pub fn cookie_key(secret: Option<&str>) -> Result<Key> {
    match secret {
        Some(secret) => Key::try_from(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("invalid cookie secret: {e}")),
        None => {
            warn!("COOKIE_SECRET not set, generating an ephemeral key");
            Ok(Key::generate())
        }
    }
}

pub fn router(state: AppState) -> Router {
    let dashboard_path = state.settings.dashboard_path.clone();

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/", get(handlers::index))
        .route("/auth/login", get(handlers::login))
        .route("/auth/callback", get(handlers::callback))
        .route("/auth/logout", get(handlers::logout))
        .route(&dashboard_path, get(handlers::dashboard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(
    config: Config,
    health_server: HealthServer,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let kc_config = config.keycloak_config();
    info!(
        issuer = %kc_config.issuer_url(),
        client_id = %kc_config.client_id,
        "Discovering identity provider"
    );

    let provider = KeycloakProvider::discover(kc_config)
        .await
        .context("identity provider discovery failed")?
        .with_response_mode(config.response_mode);

    let settings = config.bootstrap_settings().map_err(anyhow::Error::msg)?;
    let key = cookie_key(config.cookie_secret.as_deref())?;
    let state = AppState::new(Arc::new(provider), settings, key)?;

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!(addr = %addr, "Server listening");

    health_server.set_ready(true);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
            info!("Server shutting down");
        })
        .await?;

    health_server.set_ready(false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_key_rejects_short_secret() {
        assert!(cookie_key(Some("short")).is_err());
        assert!(cookie_key(Some(&"k".repeat(64))).is_ok());
        assert!(cookie_key(None).is_ok());
    }
}
