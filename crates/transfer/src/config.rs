//! Environment-driven client configuration.
//!
//! Values come from `EINVOICE_*` variables with defaults. Parsing goes through
//! a lookup function so tests can supply values without touching the process
//! environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_TEST_URL: &str = "https://test.einvoice.invalid/EInvoiceWS";
pub const DEFAULT_LIVE_URL: &str = "https://einvoice.invalid/EInvoiceWS";
pub const DEFAULT_NAMESPACE: &str = "http://tempuri.org/";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is required")]
    Missing { name: &'static str },

    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Which remote endpoint to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Test,
    Live,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Test => "test",
            Mode::Live => "live",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Mode::Test),
            "live" | "prod" | "production" => Ok(Mode::Live),
            other => Err(format!("expected test|live, got {other}")),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub mode: Mode,
    pub test_url: String,
    pub live_url: String,
    pub service_namespace: String,
    pub http_timeout: Duration,
    pub session_ttl: Duration,
    pub credentials: Option<Credentials>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Test,
            test_url: DEFAULT_TEST_URL.to_string(),
            live_url: DEFAULT_LIVE_URL.to_string(),
            service_namespace: DEFAULT_NAMESPACE.to_string(),
            http_timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(1200),
            credentials: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mode = parse_or("EINVOICE_MODE", &lookup, defaults.mode)?;
        let test_url = lookup("EINVOICE_TEST_URL").unwrap_or(defaults.test_url);
        let live_url = lookup("EINVOICE_LIVE_URL").unwrap_or(defaults.live_url);
        let service_namespace =
            lookup("EINVOICE_SERVICE_NAMESPACE").unwrap_or(defaults.service_namespace);
        let http_timeout = secs_or("EINVOICE_HTTP_TIMEOUT_SECS", &lookup, defaults.http_timeout)?;
        let session_ttl = secs_or("EINVOICE_SESSION_TTL_SECS", &lookup, defaults.session_ttl)?;

        let credentials = match (lookup("EINVOICE_USERNAME"), lookup("EINVOICE_PASSWORD")) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing { name: "EINVOICE_PASSWORD" }),
            (None, Some(_)) => return Err(ConfigError::Missing { name: "EINVOICE_USERNAME" }),
        };

        Ok(Self {
            mode,
            test_url,
            live_url,
            service_namespace,
            http_timeout,
            session_ttl,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &str {
        match self.mode {
            Mode::Test => &self.test_url,
            Mode::Live => &self.live_url,
        }
    }

    pub fn require_credentials(&self) -> Result<&Credentials, ConfigError> {
        self.credentials
            .as_ref()
            .ok_or(ConfigError::Missing { name: "EINVOICE_USERNAME" })
    }
}

/// Parse `name` with `FromStr`, falling back to `default` when unset or blank.
pub fn parse_or<T>(
    name: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

/// Whole seconds, must be positive.
pub fn secs_or(
    name: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_or(name, lookup, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
