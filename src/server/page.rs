//! [`Page`] backed by one HTTP request/response pair
//!
//! Cookies come from the request `Cookie` header. Client storage lives in
//! encrypted private cookies. The first navigation becomes a `307` redirect.

use axum::http::Uri;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum_extra::extract::{CookieJar, PrivateCookieJar};
use cookie::{Cookie, SameSite};
use tracing::warn;
use url::Url;

use crate::error::AuthError;
use crate::page::Page;

pub struct HttpPage {
    location: Url,
    jar: CookieJar,
    storage: PrivateCookieJar,
    secure: bool,
    navigation: Option<String>,
}

impl HttpPage {
    /// `origin` supplies scheme and host; the request only carries the path.
    pub fn new(
        origin: &Url,
        uri: &Uri,
        jar: CookieJar,
        storage: PrivateCookieJar,
        secure: bool,
    ) -> Result<Self, AuthError> {
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        let location = origin
            .join(path_and_query)
            .map_err(|e| AuthError::invalid_url(path_and_query, e))?;

        Ok(Self {
            location,
            jar,
            storage,
            secure,
            navigation: None,
        })
    }

    /// Redirect if a navigation was issued, otherwise render `html`.
    pub fn respond(self, html: impl FnOnce() -> String) -> Response {
        match self.navigation {
            Some(target) => (self.jar, self.storage, Redirect::temporary(&target)).into_response(),
            None => (self.jar, self.storage, Html(html())).into_response(),
        }
    }

    /// Apply the cookie writes to an arbitrary response.
    pub fn respond_with(self, response: impl IntoResponse) -> Response {
        (self.jar, self.storage, response).into_response()
    }
}

impl Page for HttpPage {
    fn location(&self) -> &Url {
        &self.location
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.jar.get(name).map(|c| c.value().to_string())
    }

    fn set_cookie(&mut self, cookie: Cookie<'static>) {
        self.jar = self.jar.clone().add(cookie);
    }

    fn storage_get(&self, key: &str) -> Option<String> {
        self.storage
            .get(key)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    fn storage_set(&mut self, key: &str, value: String) {
        let cookie = Cookie::build((key.to_string(), value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .build();
        self.storage = self.storage.clone().add(cookie);
    }

    fn storage_remove(&mut self, key: &str) {
        let removal = Cookie::build((key.to_string(), "")).path("/").build();
        self.storage = self.storage.clone().remove(removal);
    }

    fn navigate(&mut self, target: &str) {
        match &self.navigation {
            None => self.navigation = Some(target.to_string()),
            Some(first) => {
                warn!(first = %first, ignored = %target, "Navigation already issued, ignoring");
            }
        }
    }

    fn navigation(&self) -> Option<&str> {
        self.navigation.as_deref()
    }
}
