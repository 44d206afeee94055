//! Credentials and connection settings.

use std::fmt;

use crate::error::ApiError;

/// Production endpoint of the remote API.
pub const DEFAULT_ENDPOINT: &str = "https://api.sendgrid.com/api";

/// Account identifier and secret key sent with every call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_user: String,
    api_key: String,
}

impl Credentials {
    pub fn new(api_user: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_user: api_user.into(),
            api_key: api_key.into(),
        }
    }

    pub fn api_user(&self) -> &str {
        &self.api_user
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_user", &self.api_user)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Everything a `Connector` needs before its first call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub credentials: Credentials,
    pub endpoint: String,
    pub debug: bool,
    pub verify_tls: bool,
}

impl Config {
    pub fn new(api_user: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(api_user, api_key),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            debug: false,
            verify_tls: true,
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = normalize_endpoint(endpoint);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    /// Build from `NEWSLETTER_API_USER`, `NEWSLETTER_API_KEY`,
    /// `NEWSLETTER_API_ENDPOINT`, `NEWSLETTER_DEBUG` and
    /// `NEWSLETTER_VERIFY_TLS`.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ApiError::Config(format!("{name} is not set")))
        };

        let mut config = Config::new(required("NEWSLETTER_API_USER")?, required("NEWSLETTER_API_KEY")?);
        if let Some(endpoint) = lookup("NEWSLETTER_API_ENDPOINT") {
            config = config.with_endpoint(&endpoint);
        }
        if let Some(debug) = lookup("NEWSLETTER_DEBUG") {
            config.debug = parse_flag("NEWSLETTER_DEBUG", &debug)?;
        }
        if let Some(verify) = lookup("NEWSLETTER_VERIFY_TLS") {
            config.verify_tls = parse_flag("NEWSLETTER_VERIFY_TLS", &verify)?;
        }
        Ok(config)
    }
}

pub(crate) fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim_end_matches('/').to_string()
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ApiError::Config(format!("{name}: `{other}` is not a boolean"))),
    }
}
