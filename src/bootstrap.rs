//! Session bootstrapper
//!
//! Runs once per page load and ends in at most one navigation:
//!
//! ```text
//! Unknown --initialize()--> Authenticated | Unauthenticated
//! Authenticated --(token expired)--> Refreshing --ok--> Authenticated
//!                                               --err--> LoginRedirect
//! Unauthenticated --> LoginRedirect | LandingRedirect
//! Authenticated --> DashboardRedirect
//! ```
//!
//! Every asynchronous client call is awaited before the next navigation
//! decision is made.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthClient, AuthEvent, InitOptions, LoginOptions, OnLoad};
use crate::callback::{CallbackParameters, ResponseMode};
use crate::cookies::{CookiePolicy, STATE_COOKIE, SessionCookies};
use crate::error::AuthError;
use crate::logout::{self, LogoutConfig};
use crate::page::Page;

/// Seconds of remaining validity below which a token counts as expired
pub const DEFAULT_MIN_VALIDITY_SECS: u64 = 30;

pub const DEFAULT_DASHBOARD_PATH: &str = "/dashboard";

#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub login: LoginOptions,
    pub dashboard_path: String,
    /// Where unauthenticated visitors land in the check-sso flow
    pub landing_path: String,
    pub on_load: Option<OnLoad>,
    pub response_mode: ResponseMode,
    pub min_validity_secs: u64,
    /// Check token expiry right after initialization
    pub refresh_on_load: bool,
    pub cookies: CookiePolicy,
    /// Trust the `state` cookie on localhost instead of asking the client
    pub local_bypass: bool,
    pub logout: LogoutConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Authenticated,
    Unauthenticated,
    Refreshing,
    LoginRedirect,
    DashboardRedirect,
    LandingRedirect,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::LoginRedirect | Self::DashboardRedirect | Self::LandingRedirect
        )
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            // initialization failures go straight to a redirect
            (Unknown, Authenticated | Unauthenticated | LoginRedirect | LandingRedirect)
                | (Authenticated, Refreshing | DashboardRedirect)
                | (Refreshing, Authenticated | LoginRedirect)
                | (Unauthenticated, LoginRedirect | LandingRedirect)
        )
    }
}

/// How a page load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Valid session, already on the dashboard; the page renders
    Authenticated,
    /// No session, already on the landing page; the page renders
    Unauthenticated,
    DashboardRedirect,
    LoginRedirect,
    LandingRedirect,
}

impl Outcome {
    pub fn navigated(self) -> bool {
        !matches!(self, Self::Authenticated | Self::Unauthenticated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    Refreshed,
    StillValid,
    LoginRedirect,
}

/// Reacts to [`AuthEvent::TokenExpired`].
#[async_trait]
pub trait TokenExpiryHandler: Send + Sync {
    async fn on_token_expired(
        &self,
        client: &mut dyn AuthClient,
        page: &mut dyn Page,
        settings: &BootstrapSettings,
    ) -> Result<ExpiryOutcome, AuthError>;
}

/// Awaits a refresh; on failure sends the user to login.
pub struct RefreshOrLogin;

#[async_trait]
impl TokenExpiryHandler for RefreshOrLogin {
    async fn on_token_expired(
        &self,
        client: &mut dyn AuthClient,
        page: &mut dyn Page,
        settings: &BootstrapSettings,
    ) -> Result<ExpiryOutcome, AuthError> {
        info!("Token expired, updating token");
        match client.refresh_token(page, settings.min_validity_secs).await {
            Ok(true) => {
                info!("Token successfully refreshed");
                Ok(ExpiryOutcome::Refreshed)
            }
            Ok(false) => {
                info!("Token is still valid");
                Ok(ExpiryOutcome::StillValid)
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh token, redirecting to login");
                client.redirect_to_login(page, &settings.login)?;
                Ok(ExpiryOutcome::LoginRedirect)
            }
        }
    }
}

pub struct Bootstrapper<C: AuthClient> {
    client: C,
    settings: Arc<BootstrapSettings>,
    state: SessionState,
    expiry_handler: Option<Box<dyn TokenExpiryHandler>>,
}

impl<C: AuthClient> Bootstrapper<C> {
    pub fn new(client: C, settings: Arc<BootstrapSettings>) -> Self {
        Self {
            client,
            settings,
            state: SessionState::Unknown,
            expiry_handler: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn settings(&self) -> &BootstrapSettings {
        &self.settings
    }

    /// Refresh on token expiry, falling back to login.
    pub fn register_token_expiry_handler(&mut self) {
        self.set_token_expiry_handler(RefreshOrLogin);
    }

    pub fn set_token_expiry_handler(&mut self, handler: impl TokenExpiryHandler + 'static) {
        self.expiry_handler = Some(Box::new(handler));
    }

    /// Require a session: establish it, persist the callback parameters and
    /// land on the dashboard, or send the user to the identity provider.
    pub async fn ensure_authenticated(&mut self, page: &mut dyn Page) -> Result<Outcome, AuthError> {
        self.state = SessionState::Unknown;
        let options = InitOptions::new(self.settings.on_load, self.settings.response_mode);

        let authenticated = match self.client.initialize(page, &options).await {
            Ok(authenticated) => authenticated,
            Err(e) => {
                error!(error = %e, "Failed to initialize auth client");
                self.log_events();
                return self.redirect_to_login(page);
            }
        };

        if !authenticated {
            self.transition(SessionState::Unauthenticated);
            self.log_events();
            return self.redirect_to_login(page);
        }

        self.transition(SessionState::Authenticated);

        if let Some(outcome) = self.dispatch_events(page).await? {
            return Ok(outcome);
        }

        if self.settings.refresh_on_load
            && self.client.is_token_expired(self.settings.min_validity_secs)
            && let Some(outcome) = self.refresh(page).await?
        {
            return Ok(outcome);
        }

        self.persist_callback(page);
        Ok(self.land_on_dashboard(page))
    }

    /// Check for a session without forcing login: authenticated visitors go
    /// to the dashboard, everyone else to the landing page.
    pub async fn check_authentication(&mut self, page: &mut dyn Page) -> Result<Outcome, AuthError> {
        self.state = SessionState::Unknown;

        if self.settings.local_bypass && page.host() == Some("localhost") {
            warn!("Local bypass active, trusting the state cookie");
            if page.cookie(STATE_COOKIE).is_some() {
                self.transition(SessionState::Authenticated);
                return Ok(self.land_on_dashboard(page));
            }
            self.transition(SessionState::Unauthenticated);
            return Ok(self.land_on_landing(page));
        }

        let options = InitOptions::new(Some(OnLoad::CheckSso), self.settings.response_mode);

        match self.client.initialize(page, &options).await {
            Ok(true) => {
                self.transition(SessionState::Authenticated);
                if let Some(outcome) = self.dispatch_events(page).await? {
                    return Ok(outcome);
                }
                Ok(self.land_on_dashboard(page))
            }
            Ok(false) => {
                self.transition(SessionState::Unauthenticated);
                self.log_events();
                Ok(self.land_on_landing(page))
            }
            Err(e) => {
                warn!(error = %e, "Session check failed");
                self.log_events();
                Ok(self.land_on_landing(page))
            }
        }
    }

    /// Send the user to the identity provider.
    pub fn login(&mut self, page: &mut dyn Page) -> Result<Outcome, AuthError> {
        self.state = SessionState::Unauthenticated;
        self.redirect_to_login(page)
    }

    /// Drop the local session and start the logout. Without a perimeter hop
    /// the client's discovered end-session endpoint is used; the perimeter
    /// `returl` is always built from config.
    pub fn logout(&mut self, page: &mut dyn Page) {
        let settings = Arc::clone(&self.settings);
        if settings.logout.logoff_url.is_none() {
            match self
                .client
                .redirect_to_logout(page, &settings.logout.redirect_uri)
            {
                Ok(()) => {
                    self.log_events();
                    return;
                }
                Err(e) => warn!(error = %e, "Client logout failed, using configured endpoint"),
            }
        }
        self.client.clear_token(page);
        logout::logout(page, &settings.logout);
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(from = ?self.state, to = ?next, "Unexpected session state transition");
        }
        debug!(from = ?self.state, to = ?next, "Session state transition");
        self.state = next;
    }

    fn redirect_to_login(&mut self, page: &mut dyn Page) -> Result<Outcome, AuthError> {
        self.transition(SessionState::LoginRedirect);
        info!(
            redirect_uri = %self.settings.login.redirect_uri,
            "Redirecting to login"
        );
        self.client.redirect_to_login(page, &self.settings.login)?;
        Ok(Outcome::LoginRedirect)
    }

    async fn refresh(&mut self, page: &mut dyn Page) -> Result<Option<Outcome>, AuthError> {
        self.transition(SessionState::Refreshing);
        info!("Token is expired, updating token");

        match self
            .client
            .refresh_token(page, self.settings.min_validity_secs)
            .await
        {
            Ok(refreshed) => {
                debug!(refreshed = refreshed, "Token refresh finished");
                self.transition(SessionState::Authenticated);
                self.log_events();
                Ok(None)
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh token");
                self.log_events();
                self.redirect_to_login(page).map(Some)
            }
        }
    }

    /// Handle queued client events. Returns an outcome if one of them ended
    /// the page load.
    async fn dispatch_events(&mut self, page: &mut dyn Page) -> Result<Option<Outcome>, AuthError> {
        loop {
            let events = self.client.take_events();
            if events.is_empty() {
                return Ok(None);
            }

            for event in events {
                debug!(event = ?event, "Auth client event");
                if event != AuthEvent::TokenExpired {
                    continue;
                }
                if let Some(outcome) = self.on_token_expired(page).await? {
                    return Ok(Some(outcome));
                }
            }
        }
    }

    async fn on_token_expired(&mut self, page: &mut dyn Page) -> Result<Option<Outcome>, AuthError> {
        if self.expiry_handler.is_none() {
            debug!("Token expired, no expiry handler registered");
            return Ok(None);
        }

        self.transition(SessionState::Refreshing);

        let result = match self.expiry_handler.as_deref() {
            Some(handler) => {
                handler
                    .on_token_expired(&mut self.client, page, &self.settings)
                    .await?
            }
            None => return Ok(None),
        };

        match result {
            ExpiryOutcome::Refreshed | ExpiryOutcome::StillValid => {
                self.transition(SessionState::Authenticated);
                Ok(None)
            }
            ExpiryOutcome::LoginRedirect => {
                self.transition(SessionState::LoginRedirect);
                Ok(Some(Outcome::LoginRedirect))
            }
        }
    }

    fn log_events(&mut self) {
        for event in self.client.take_events() {
            debug!(event = ?event, "Auth client event");
        }
    }

    fn persist_callback(&mut self, page: &mut dyn Page) {
        let params = CallbackParameters::from_url(page.location(), self.settings.response_mode);
        info!(
            state = params.state.is_some(),
            session_state = params.session_state.is_some(),
            code = params.code.is_some(),
            "Callback parameters"
        );

        let written = SessionCookies::from_callback(&params).write(page, &self.settings.cookies);
        debug!(written = written, "Session cookies written");
    }

    fn land_on_dashboard(&mut self, page: &mut dyn Page) -> Outcome {
        let dashboard = self.settings.dashboard_path.clone();
        if page.path() == dashboard {
            info!(subject = ?self.client.subject(), "User authenticated and can access dashboard");
            return Outcome::Authenticated;
        }

        self.transition(SessionState::DashboardRedirect);
        info!(subject = ?self.client.subject(), to = %dashboard, "Redirecting to dashboard");
        page.navigate(&dashboard);
        Outcome::DashboardRedirect
    }

    fn land_on_landing(&mut self, page: &mut dyn Page) -> Outcome {
        let landing = self.settings.landing_path.clone();
        if page.path() == landing {
            return Outcome::Unauthenticated;
        }

        self.transition(SessionState::LandingRedirect);
        info!(to = %landing, "Not authenticated, redirecting to landing page");
        page.navigate(&landing);
        Outcome::LandingRedirect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieWritePolicy;
    use crate::page::MemoryPage;

    const LOGIN_URL: &str = "https://idp.example/realms/r/protocol/openid-connect/auth";

    /// Scripted client recording every call.
    #[derive(Default)]
    struct FakeClient {
        /// `None` makes initialize fail
        authenticated: Option<bool>,
        expired: bool,
        /// `None` makes refresh fail
        refresh_result: Option<bool>,
        init_events: Vec<AuthEvent>,
        calls: Vec<String>,
        events: Vec<AuthEvent>,
    }

    impl FakeClient {
        fn authenticated() -> Self {
            Self {
                authenticated: Some(true),
                refresh_result: Some(true),
                ..Self::default()
            }
        }

        fn unauthenticated() -> Self {
            Self {
                authenticated: Some(false),
                ..Self::default()
            }
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls.iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl AuthClient for FakeClient {
        async fn initialize(
            &mut self,
            _page: &mut dyn Page,
            options: &InitOptions,
        ) -> Result<bool, AuthError> {
            self.calls.push(format!("initialize({:?})", options.on_load));
            self.events.extend(self.init_events.iter().cloned());
            self.authenticated
                .ok_or_else(|| AuthError::Discovery("connection refused".to_string()))
        }

        fn is_token_expired(&self, _min_validity_secs: u64) -> bool {
            self.expired
        }

        async fn refresh_token(
            &mut self,
            page: &mut dyn Page,
            min_validity_secs: u64,
        ) -> Result<bool, AuthError> {
            self.calls.push(format!(
                "refresh({min_validity_secs}, navigated={})",
                page.navigation().is_some()
            ));
            match self.refresh_result {
                Some(refreshed) => {
                    self.expired = false;
                    Ok(refreshed)
                }
                None => Err(AuthError::Refresh("invalid_grant".to_string())),
            }
        }

        fn redirect_to_login(
            &mut self,
            page: &mut dyn Page,
            options: &LoginOptions,
        ) -> Result<(), AuthError> {
            self.calls.push(format!("login({})", options.redirect_uri));
            page.navigate(LOGIN_URL);
            Ok(())
        }

        fn redirect_to_logout(
            &mut self,
            page: &mut dyn Page,
            _redirect_uri: &str,
        ) -> Result<(), AuthError> {
            self.calls.push("logout".to_string());
            page.navigate("https://idp.example/logout");
            Ok(())
        }

        fn clear_token(&mut self, _page: &mut dyn Page) {
            self.calls.push("clear_token".to_string());
        }

        fn take_events(&mut self) -> Vec<AuthEvent> {
            std::mem::take(&mut self.events)
        }
    }

    fn settings(response_mode: ResponseMode) -> Arc<BootstrapSettings> {
        Arc::new(BootstrapSettings {
            login: LoginOptions {
                redirect_uri: "https://app.example/auth/callback".to_string(),
                idp_hint: String::new(),
            },
            dashboard_path: DEFAULT_DASHBOARD_PATH.to_string(),
            landing_path: "/".to_string(),
            on_load: Some(OnLoad::LoginRequired),
            response_mode,
            min_validity_secs: DEFAULT_MIN_VALIDITY_SECS,
            refresh_on_load: true,
            cookies: CookiePolicy::default(),
            local_bypass: false,
            logout: LogoutConfig {
                logoff_url: None,
                auth_server_url: "https://idp.example".to_string(),
                realm: "r".to_string(),
                client_id: "c".to_string(),
                redirect_uri: "https://app.example".to_string(),
            },
        })
    }

    fn page(url: &str) -> MemoryPage {
        MemoryPage::new(url).unwrap()
    }

    #[tokio::test]
    async fn test_unauthenticated_redirects_to_login_once() {
        let mut bootstrapper =
            Bootstrapper::new(FakeClient::unauthenticated(), settings(ResponseMode::Query));
        let mut page = page("https://app.example/auth/callback?state=S1&code=C1");

        let outcome = bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::LoginRedirect);
        assert_eq!(page.navigations(), [LOGIN_URL.to_string()]);
        assert!(page.cookie_writes().is_empty());
        assert_eq!(bootstrapper.state(), SessionState::LoginRedirect);
        assert_eq!(
            bootstrapper.client().calls,
            vec![
                "initialize(Some(LoginRequired))".to_string(),
                "login(https://app.example/auth/callback)".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_initialize_failure_redirects_to_login() {
        let client = FakeClient {
            authenticated: None,
            ..FakeClient::default()
        };
        let mut bootstrapper = Bootstrapper::new(client, settings(ResponseMode::Query));
        let mut page = page("https://app.example/");

        let outcome = bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::LoginRedirect);
        assert_eq!(page.navigations().len(), 1);
        assert!(page.cookie_writes().is_empty());
    }

    #[tokio::test]
    async fn test_valid_token_goes_to_dashboard_without_refresh() {
        let mut bootstrapper =
            Bootstrapper::new(FakeClient::authenticated(), settings(ResponseMode::Query));
        let mut page = page("https://app.example/auth/callback");

        let outcome = bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::DashboardRedirect);
        assert_eq!(page.navigations(), ["/dashboard".to_string()]);
        assert_eq!(bootstrapper.client().count("refresh"), 0);
        assert_eq!(bootstrapper.state(), SessionState::DashboardRedirect);
    }

    #[tokio::test]
    async fn test_expired_token_refresh_awaited_before_navigation() {
        let client = FakeClient {
            expired: true,
            ..FakeClient::authenticated()
        };
        let mut bootstrapper = Bootstrapper::new(client, settings(ResponseMode::Query));
        let mut page = page("https://app.example/auth/callback");

        let outcome = bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::DashboardRedirect);
        assert_eq!(page.navigations(), ["/dashboard".to_string()]);
        assert_eq!(
            bootstrapper.client().calls,
            vec![
                "initialize(Some(LoginRequired))".to_string(),
                "refresh(30, navigated=false)".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_redirects_to_login() {
        let client = FakeClient {
            expired: true,
            refresh_result: None,
            ..FakeClient::authenticated()
        };
        let mut bootstrapper = Bootstrapper::new(client, settings(ResponseMode::Fragment));
        let mut page = page("https://app.example/#state=S1&code=C1");

        let outcome = bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::LoginRedirect);
        assert_eq!(page.navigations(), [LOGIN_URL.to_string()]);
        assert!(page.cookie_writes().is_empty());
        assert_eq!(bootstrapper.state(), SessionState::LoginRedirect);
    }

    #[tokio::test]
    async fn test_refresh_on_load_disabled() {
        let client = FakeClient {
            expired: true,
            ..FakeClient::authenticated()
        };
        let mut cfg = (*settings(ResponseMode::Query)).clone();
        cfg.refresh_on_load = false;
        let mut bootstrapper = Bootstrapper::new(client, Arc::new(cfg));
        let mut page = page("https://app.example/");

        bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(bootstrapper.client().count("refresh"), 0);
        assert_eq!(page.navigations(), ["/dashboard".to_string()]);
    }

    #[tokio::test]
    async fn test_fragment_parameters_become_cookies() {
        let mut bootstrapper =
            Bootstrapper::new(FakeClient::authenticated(), settings(ResponseMode::Fragment));
        let mut page = page("https://app.example/#state=S1&session_state=SS1&code=C1");

        bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(page.cookie("state").as_deref(), Some("S1"));
        assert_eq!(page.cookie("session_state").as_deref(), Some("SS1"));
        assert_eq!(page.cookie("code").as_deref(), Some("C1"));
        assert!(page.cookie_writes().iter().all(|c| c.path() == Some("/")));
    }

    #[tokio::test]
    async fn test_second_load_is_idempotent() {
        let mut bootstrapper =
            Bootstrapper::new(FakeClient::authenticated(), settings(ResponseMode::Fragment));
        let mut first = page("https://app.example/#state=S1&session_state=SS1&code=C1");
        bootstrapper.ensure_authenticated(&mut first).await.unwrap();

        let mut second = first.reload_at("https://app.example/").unwrap();
        let outcome = bootstrapper.ensure_authenticated(&mut second).await.unwrap();

        assert_eq!(outcome, Outcome::DashboardRedirect);
        assert_eq!(first.navigations(), second.navigations());
        assert!(second.cookie_writes().is_empty());
        assert_eq!(SessionCookies::read(&first), SessionCookies::read(&second));
    }

    #[tokio::test]
    async fn test_always_policy_writes_all_cookies() {
        let mut cfg = (*settings(ResponseMode::Query)).clone();
        cfg.cookies.write = CookieWritePolicy::Always;
        let mut bootstrapper = Bootstrapper::new(FakeClient::authenticated(), Arc::new(cfg));
        let mut page = page("https://app.example/auth/callback?code=C1");

        bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(page.cookie_writes().len(), 3);
        assert_eq!(page.cookie("state").as_deref(), Some(""));
        assert_eq!(page.cookie("code").as_deref(), Some("C1"));
    }

    #[tokio::test]
    async fn test_always_policy_clears_cookies_on_plain_reload() {
        let mut cfg = (*settings(ResponseMode::Query)).clone();
        cfg.cookies.write = CookieWritePolicy::Always;
        let mut bootstrapper = Bootstrapper::new(FakeClient::authenticated(), Arc::new(cfg));
        let mut first = page("https://app.example/auth/callback?state=S1&code=C1");
        bootstrapper.ensure_authenticated(&mut first).await.unwrap();
        assert_eq!(first.cookie("state").as_deref(), Some("S1"));

        let mut second = first.reload_at("https://app.example/auth/callback").unwrap();
        bootstrapper.ensure_authenticated(&mut second).await.unwrap();

        assert_eq!(second.cookie_writes().len(), 3);
        assert_eq!(second.cookie("state").as_deref(), Some(""));
        assert_eq!(second.cookie("code").as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_already_on_dashboard_does_not_navigate() {
        let mut bootstrapper =
            Bootstrapper::new(FakeClient::authenticated(), settings(ResponseMode::Query));
        let mut page = page("https://app.example/dashboard");

        let outcome = bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::Authenticated);
        assert!(!outcome.navigated());
        assert!(page.navigations().is_empty());
        assert_eq!(bootstrapper.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_expiry_handler_refreshes_on_event() {
        let client = FakeClient {
            init_events: vec![AuthEvent::Ready(true), AuthEvent::TokenExpired],
            ..FakeClient::authenticated()
        };
        let mut bootstrapper = Bootstrapper::new(client, settings(ResponseMode::Query));
        bootstrapper.register_token_expiry_handler();
        let mut page = page("https://app.example/");

        let outcome = bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::DashboardRedirect);
        assert_eq!(bootstrapper.client().count("refresh(30, navigated=false)"), 1);
    }

    #[tokio::test]
    async fn test_expiry_handler_refresh_failure_redirects_to_login() {
        let client = FakeClient {
            init_events: vec![AuthEvent::TokenExpired],
            refresh_result: None,
            ..FakeClient::authenticated()
        };
        let mut bootstrapper = Bootstrapper::new(client, settings(ResponseMode::Query));
        bootstrapper.register_token_expiry_handler();
        let mut page = page("https://app.example/");

        let outcome = bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::LoginRedirect);
        assert_eq!(page.navigations(), [LOGIN_URL.to_string()]);
        assert_eq!(bootstrapper.state(), SessionState::LoginRedirect);
    }

    #[tokio::test]
    async fn test_token_expired_event_without_handler_is_ignored() {
        let client = FakeClient {
            init_events: vec![AuthEvent::TokenExpired],
            ..FakeClient::authenticated()
        };
        let mut bootstrapper = Bootstrapper::new(client, settings(ResponseMode::Query));
        let mut page = page("https://app.example/");

        let outcome = bootstrapper.ensure_authenticated(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::DashboardRedirect);
        assert_eq!(bootstrapper.client().count("refresh"), 0);
    }

    #[tokio::test]
    async fn test_check_authentication_on_landing_page() {
        let mut bootstrapper =
            Bootstrapper::new(FakeClient::unauthenticated(), settings(ResponseMode::Query));
        let mut page = page("https://app.example/");

        let outcome = bootstrapper.check_authentication(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::Unauthenticated);
        assert!(page.navigations().is_empty());
        assert_eq!(
            bootstrapper.client().calls,
            vec!["initialize(Some(CheckSso))".to_string()]
        );
    }

    #[tokio::test]
    async fn test_check_authentication_redirects_to_landing() {
        let mut bootstrapper =
            Bootstrapper::new(FakeClient::unauthenticated(), settings(ResponseMode::Query));
        let mut page = page("https://app.example/dashboard");

        let outcome = bootstrapper.check_authentication(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::LandingRedirect);
        assert_eq!(page.navigations(), ["/".to_string()]);
        assert_eq!(bootstrapper.client().count("login"), 0);
    }

    #[tokio::test]
    async fn test_check_authentication_failure_goes_to_landing() {
        let client = FakeClient {
            authenticated: None,
            ..FakeClient::default()
        };
        let mut bootstrapper = Bootstrapper::new(client, settings(ResponseMode::Query));
        let mut page = page("https://app.example/dashboard");

        let outcome = bootstrapper.check_authentication(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::LandingRedirect);
        assert_eq!(bootstrapper.state(), SessionState::LandingRedirect);
    }

    #[tokio::test]
    async fn test_check_authentication_sends_session_to_dashboard() {
        let mut bootstrapper =
            Bootstrapper::new(FakeClient::authenticated(), settings(ResponseMode::Query));
        let mut page = page("https://app.example/");

        let outcome = bootstrapper.check_authentication(&mut page).await.unwrap();

        assert_eq!(outcome, Outcome::DashboardRedirect);
        assert_eq!(page.navigations(), ["/dashboard".to_string()]);
        assert!(page.cookie_writes().is_empty());
    }

    #[tokio::test]
    async fn test_local_bypass_trusts_state_cookie() {
        let mut cfg = (*settings(ResponseMode::Query)).clone();
        cfg.local_bypass = true;
        let cfg = Arc::new(cfg);

        let mut bootstrapper = Bootstrapper::new(FakeClient::unauthenticated(), cfg.clone());
        let mut authed = page("http://localhost:3000/").with_cookie("state", "S1");
        let outcome = bootstrapper.check_authentication(&mut authed).await.unwrap();
        assert_eq!(outcome, Outcome::DashboardRedirect);
        assert!(bootstrapper.client().calls.is_empty());

        let mut anonymous = page("http://localhost:3000/dashboard");
        let outcome = bootstrapper.check_authentication(&mut anonymous).await.unwrap();
        assert_eq!(outcome, Outcome::LandingRedirect);

        // Only localhost is trusted
        let mut remote = page("https://app.example/").with_cookie("state", "S1");
        let outcome = bootstrapper.check_authentication(&mut remote).await.unwrap();
        assert_eq!(outcome, Outcome::Unauthenticated);
        assert_eq!(bootstrapper.client().calls.len(), 1);
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let mut cfg = (*settings(ResponseMode::Query)).clone();
        cfg.logout.logoff_url = Some(logout::DEFAULT_LOGOFF_URL.to_string());
        let mut bootstrapper = Bootstrapper::new(FakeClient::authenticated(), Arc::new(cfg));

        let mut login_page = page("https://app.example/auth/login");
        assert_eq!(bootstrapper.login(&mut login_page).unwrap(), Outcome::LoginRedirect);
        assert_eq!(login_page.navigations(), [LOGIN_URL.to_string()]);

        let mut logout_page = page("https://app.example/dashboard");
        bootstrapper.logout(&mut logout_page);
        assert_eq!(
            logout_page.navigations(),
            [bootstrapper.settings().logout.logout_url()]
        );
        assert_eq!(bootstrapper.client().count("clear_token"), 1);
        assert_eq!(bootstrapper.client().count("logout"), 0);
    }

    #[tokio::test]
    async fn test_logout_without_perimeter_uses_client_endpoint() {
        let mut cfg = (*settings(ResponseMode::Query)).clone();
        cfg.logout.logoff_url = None;
        let mut bootstrapper = Bootstrapper::new(FakeClient::authenticated(), Arc::new(cfg));
        let mut page = page("https://app.example/dashboard");

        bootstrapper.logout(&mut page);

        assert_eq!(page.navigations(), ["https://idp.example/logout".to_string()]);
        assert_eq!(bootstrapper.client().count("logout"), 1);
        assert_eq!(bootstrapper.client().count("clear_token"), 0);
    }

    #[test]
    fn test_state_transitions() {
        use SessionState::*;

        assert!(Unknown.can_transition_to(Authenticated));
        assert!(Unknown.can_transition_to(Unauthenticated));
        assert!(Authenticated.can_transition_to(Refreshing));
        assert!(Refreshing.can_transition_to(Authenticated));
        assert!(Refreshing.can_transition_to(LoginRedirect));
        assert!(Unauthenticated.can_transition_to(LoginRedirect));
        assert!(Authenticated.can_transition_to(DashboardRedirect));

        assert!(!Unauthenticated.can_transition_to(DashboardRedirect));
        assert!(!LoginRedirect.can_transition_to(Authenticated));
        assert!(!DashboardRedirect.can_transition_to(LoginRedirect));

        assert!(LoginRedirect.is_terminal());
        assert!(DashboardRedirect.is_terminal());
        assert!(!Authenticated.is_terminal());
        assert!(!Refreshing.is_terminal());
    }
}
