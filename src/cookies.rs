//! Session cookies mirroring the callback parameters

use clap::ValueEnum;
use cookie::{Cookie, SameSite};
use serde::{Deserialize, Serialize};

use crate::callback::CallbackParameters;
use crate::page::Page;

pub const STATE_COOKIE: &str = "state";
pub const SESSION_STATE_COOKIE: &str = "session_state";
pub const CODE_COOKIE: &str = "code";

/// When the session cookies are written after a successful initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CookieWritePolicy {
    /// Only the parameters present in the callback URL are written
    #[default]
    WhenPresent,
    /// All three cookies on every load; absent parameters are written empty.
    /// A reload without callback parameters therefore clears the values of
    /// the previous callback, so repeated loads are not write-idempotent.
    Always,
}

/// Attributes applied to every session cookie.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub write: CookieWritePolicy,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub max_age_secs: Option<i64>,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self {
            write: CookieWritePolicy::WhenPresent,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            max_age_secs: None,
        }
    }
}

/// Parse `lax`, `strict` or `none` (case-insensitive).
pub fn parse_same_site(s: &str) -> Result<SameSite, String> {
    match s.to_lowercase().as_str() {
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        "none" => Ok(SameSite::None),
        other => Err(format!(
            "invalid SameSite value '{other}', expected lax, strict or none"
        )),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCookies {
    pub state: Option<String>,
    pub session_state: Option<String>,
    pub code: Option<String>,
}

impl SessionCookies {
    pub fn from_callback(params: &CallbackParameters) -> Self {
        Self {
            state: params.state.clone(),
            session_state: params.session_state.clone(),
            code: params.code.clone(),
        }
    }

    pub fn read(page: &dyn Page) -> Self {
        Self {
            state: page.cookie(STATE_COOKIE),
            session_state: page.cookie(SESSION_STATE_COOKIE),
            code: page.cookie(CODE_COOKIE),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.session_state.is_none() && self.code.is_none()
    }

    /// Cookies to set under `policy`, in `state`, `session_state`, `code` order.
    pub fn to_cookies(&self, policy: &CookiePolicy) -> Vec<Cookie<'static>> {
        let entries = [
            (STATE_COOKIE, &self.state),
            (SESSION_STATE_COOKIE, &self.session_state),
            (CODE_COOKIE, &self.code),
        ];

        entries
            .into_iter()
            .filter_map(|(name, value)| match (policy.write, value) {
                (_, Some(v)) => Some(build_cookie(name, v.clone(), policy)),
                (CookieWritePolicy::Always, None) => Some(build_cookie(name, String::new(), policy)),
                (CookieWritePolicy::WhenPresent, None) => None,
            })
            .collect()
    }

    /// Write the cookies to the page. Returns the number written.
    pub fn write(&self, page: &mut dyn Page, policy: &CookiePolicy) -> usize {
        let cookies = self.to_cookies(policy);
        let written = cookies.len();
        for cookie in cookies {
            page.set_cookie(cookie);
        }
        written
    }
}

fn build_cookie(name: &'static str, value: String, policy: &CookiePolicy) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .path("/")
        .secure(policy.secure)
        .http_only(policy.http_only)
        .same_site(policy.same_site);

    if let Some(secs) = policy.max_age_secs {
        builder = builder.max_age(cookie::time::Duration::seconds(secs));
    }

    builder.build()
}
