//! Authorization-response parameters carried back from the identity provider

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use url::{Url, form_urlencoded};

/// Where the identity provider puts the authorization response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// `?code=...`; the only mode a server ever sees
    #[default]
    Query,
    /// `#code=...`; browser-only
    Fragment,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of an authorization response. Every field is optional: a plain
/// reload of an authenticated page carries none of them. Empty values count
/// as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackParameters {
    pub state: Option<String>,
    pub session_state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParameters {
    /// Parse `key=value&...` pairs, with or without a leading `#` or `?`.
    pub fn parse(input: &str) -> Self {
        let input = input.trim_start_matches(['#', '?']);
        let mut params = Self::default();

        for (key, value) in form_urlencoded::parse(input.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "state" => &mut params.state,
                "session_state" => &mut params.session_state,
                "code" => &mut params.code,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            // First occurrence wins
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }

        params
    }

    pub fn from_url(url: &Url, mode: ResponseMode) -> Self {
        let raw = match mode {
            ResponseMode::Query => url.query(),
            ResponseMode::Fragment => url.fragment(),
        };
        raw.map(Self::parse).unwrap_or_default()
    }

    /// True if none of `state`, `session_state` or `code` is present.
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.session_state.is_none() && self.code.is_none()
    }

    /// True if this looks like a successful authorization response.
    pub fn is_callback(&self) -> bool {
        self.code.is_some() && self.state.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
