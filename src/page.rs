//! Page abstraction
//!
//! A [`Page`] is everything the bootstrapper and the auth client may touch
//! during one page load: the current location, document cookies, client-side
//! storage and a single full-page navigation. The HTTP service implements it
//! per request; [`MemoryPage`] keeps everything in memory.

use std::collections::{BTreeMap, HashMap};

use cookie::Cookie;
use url::Url;

use crate::error::AuthError;

pub trait Page: Send {
    /// Absolute URL of the current page, including query and fragment.
    fn location(&self) -> &Url;

    fn cookie(&self, name: &str) -> Option<String>;

    fn set_cookie(&mut self, cookie: Cookie<'static>);

    /// Client-private storage that survives the redirect round-trip.
    fn storage_get(&self, key: &str) -> Option<String>;

    fn storage_set(&mut self, key: &str, value: String);

    fn storage_remove(&mut self, key: &str);

    /// Full-page navigation. Nothing issued after the first navigation of a
    /// page load is observable.
    fn navigate(&mut self, target: &str);

    /// The navigation issued during this page load, if any.
    fn navigation(&self) -> Option<&str>;

    fn path(&self) -> &str {
        self.location().path()
    }

    fn host(&self) -> Option<&str> {
        self.location().host_str()
    }
}

/// In-memory page that records every cookie write and navigation.
#[derive(Debug, Clone)]
pub struct MemoryPage {
    location: Url,
    cookies: BTreeMap<String, Cookie<'static>>,
    cookie_writes: Vec<Cookie<'static>>,
    storage: HashMap<String, String>,
    navigations: Vec<String>,
}

impl MemoryPage {
    pub fn new(location: &str) -> Result<Self, AuthError> {
        let location = Url::parse(location).map_err(|e| AuthError::invalid_url(location, e))?;
        Ok(Self {
            location,
            cookies: BTreeMap::new(),
            cookie_writes: Vec::new(),
            storage: HashMap::new(),
            navigations: Vec::new(),
        })
    }

    /// Load another URL in the same browser: cookies and storage carry over,
    /// recorded writes and navigations start empty.
    pub fn reload_at(&self, location: &str) -> Result<Self, AuthError> {
        let mut page = Self::new(location)?;
        page.cookies = self.cookies.clone();
        page.storage = self.storage.clone();
        Ok(page)
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(
            name.to_string(),
            Cookie::new(name.to_string(), value.to_string()),
        );
        self
    }

    pub fn navigations(&self) -> &[String] {
        &self.navigations
    }

    pub fn cookie_writes(&self) -> &[Cookie<'static>] {
        &self.cookie_writes
    }

    pub fn cookie_jar(&self) -> impl Iterator<Item = &Cookie<'static>> {
        self.cookies.values()
    }
}

impl Page for MemoryPage {
    fn location(&self) -> &Url {
        &self.location
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.get(name).map(|c| c.value().to_string())
    }

    fn set_cookie(&mut self, cookie: Cookie<'static>) {
        self.cookie_writes.push(cookie.clone());
        let expired = cookie
            .max_age()
            .is_some_and(|age| age.is_zero() || age.is_negative());
        if expired {
            self.cookies.remove(cookie.name());
        } else {
            self.cookies.insert(cookie.name().to_string(), cookie);
        }
    }

    fn storage_get(&self, key: &str) -> Option<String> {
        self.storage.get(key).cloned()
    }

    fn storage_set(&mut self, key: &str, value: String) {
        self.storage.insert(key.to_string(), value);
    }

    fn storage_remove(&mut self, key: &str) {
        self.storage.remove(key);
    }

    fn navigate(&mut self, target: &str) {
        self.navigations.push(target.to_string());
    }

    fn navigation(&self) -> Option<&str> {
        self.navigations.first().map(String::as_str)
    }
}
