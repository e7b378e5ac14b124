//! HTTP handlers. Each request runs one bootstrapper against an [`HttpPage`].

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::{CookieJar, PrivateCookieJar};
use tracing::{error, warn};

use super::AppState;
use super::page::HttpPage;
use super::views;
use crate::auth::AuthClient;
use crate::bootstrap::Bootstrapper;
use crate::callback::CallbackParameters;
use crate::error::AuthError;
use crate::page::Page;

fn open_page(
    state: &AppState,
    uri: &Uri,
    jar: CookieJar,
    storage: PrivateCookieJar,
) -> Result<HttpPage, Response> {
    HttpPage::new(&state.origin, uri, jar, storage, state.settings.cookies.secure).map_err(|e| {
        warn!(error = %e, uri = %uri, "Rejected request URI");
        (StatusCode::BAD_REQUEST, "invalid request URI").into_response()
    })
}

fn bootstrapper(state: &AppState) -> Bootstrapper<Box<dyn AuthClient>> {
    let mut bootstrapper = Bootstrapper::new(state.factory.create(), state.settings.clone());
    bootstrapper.register_token_expiry_handler();
    bootstrapper
}

fn error_response(page: HttpPage, e: &AuthError) -> Response {
    error!(error = %e, "Authentication flow failed");
    let (status, reason) = if e.is_remote() {
        (StatusCode::BAD_GATEWAY, "identity_provider_error")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
    };
    page.respond_with((
        status,
        Html(views::error("The sign-in flow could not be completed.", reason)),
    ))
}

/// GET /: run the callback if parameters are present, otherwise check for
/// an existing session
pub async fn index(
    State(state): State<AppState>,
    uri: Uri,
    jar: CookieJar,
    storage: PrivateCookieJar,
) -> Response {
    let mut page = match open_page(&state, &uri, jar, storage) {
        Ok(page) => page,
        Err(response) => return response,
    };

    let params = CallbackParameters::from_url(page.location(), state.settings.response_mode);
    let mut bootstrapper = bootstrapper(&state);

    let result = if params.is_callback() || params.is_error() {
        bootstrapper.ensure_authenticated(&mut page).await
    } else {
        bootstrapper.check_authentication(&mut page).await
    };

    match result {
        Ok(_) => page.respond(views::landing),
        Err(e) => error_response(page, &e),
    }
}

/// GET /auth/login: redirect to the identity provider
pub async fn login(
    State(state): State<AppState>,
    uri: Uri,
    jar: CookieJar,
    storage: PrivateCookieJar,
) -> Response {
    let mut page = match open_page(&state, &uri, jar, storage) {
        Ok(page) => page,
        Err(response) => return response,
    };

    match bootstrapper(&state).login(&mut page) {
        Ok(_) => page.respond(views::landing),
        Err(e) => error_response(page, &e),
    }
}

/// GET /auth/callback: complete the login and land on the dashboard
pub async fn callback(
    State(state): State<AppState>,
    uri: Uri,
    jar: CookieJar,
    storage: PrivateCookieJar,
) -> Response {
    require_session(&state, &uri, jar, storage).await
}

/// GET <dashboard>: require a session
pub async fn dashboard(
    State(state): State<AppState>,
    uri: Uri,
    jar: CookieJar,
    storage: PrivateCookieJar,
) -> Response {
    require_session(&state, &uri, jar, storage).await
}

async fn require_session(
    state: &AppState,
    uri: &Uri,
    jar: CookieJar,
    storage: PrivateCookieJar,
) -> Response {
    let mut page = match open_page(state, uri, jar, storage) {
        Ok(page) => page,
        Err(response) => return response,
    };

    let mut bootstrapper = bootstrapper(state);
    match bootstrapper.ensure_authenticated(&mut page).await {
        Ok(_) => {
            let subject = bootstrapper.client().subject().map(str::to_string);
            page.respond(|| views::dashboard(subject.as_deref()))
        }
        Err(e) => error_response(page, &e),
    }
}

/// GET /auth/logout: drop the local session and chain the perimeter logout
pub async fn logout(
    State(state): State<AppState>,
    uri: Uri,
    jar: CookieJar,
    storage: PrivateCookieJar,
) -> Response {
    let mut page = match open_page(&state, &uri, jar, storage) {
        Ok(page) => page,
        Err(response) => return response,
    };

    bootstrapper(&state).logout(&mut page);
    page.respond(views::landing)
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}
