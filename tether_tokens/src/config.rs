//! Configuration of the authentication proxy

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::sources::platform::{KEY_MANAGER_AUTH_PATH, SESSION_AUTH_PATH};

/// Timeouts applied to every transport built by the proxy
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    /// Time allowed to establish a connection, in milliseconds
    pub connect_ms: u64,
    /// Time allowed for a whole request, in milliseconds
    pub request_ms: u64,
}

impl Default for Timeouts {
    /// Connect timeout of 1 second, request timeout of 30 seconds
    fn default() -> Self {
        Self {
            connect_ms: 1_000,
            request_ms: 30_000,
        }
    }
}

impl Timeouts {
    /// The connect timeout
    #[inline]
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    /// The request timeout
    #[inline]
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }
}

/// Where and how the proxy authenticates identities
///
/// ```
/// # use tether_tokens::ProxyConfig;
/// let config: ProxyConfig = serde_json::from_value(serde_json::json!({
///     "session_auth_url": "https://pod.example.com:8444",
///     "key_manager_url": "https://km.example.com:8444",
/// }))
/// .unwrap();
///
/// let endpoints = config.validate().unwrap();
/// assert_eq!(
///     endpoints.session_auth.as_str(),
///     "https://pod.example.com:8444/sessionauth/v1/authenticate"
/// );
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct ProxyConfig {
    /// Base URL of the session authenticator
    #[serde(default)]
    pub session_auth_url: String,
    /// Base URL of the key manager authenticator
    #[serde(default)]
    pub key_manager_url: String,
    /// Path of the session authentication endpoint
    #[serde(default = "default_session_auth_path")]
    pub session_auth_path: String,
    /// Path of the key manager authentication endpoint
    #[serde(default = "default_key_manager_auth_path")]
    pub key_manager_auth_path: String,
    /// Transport timeouts
    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_session_auth_path() -> String {
    SESSION_AUTH_PATH.to_owned()
}

fn default_key_manager_auth_path() -> String {
    KEY_MANAGER_AUTH_PATH.to_owned()
}

/// Fully resolved authentication endpoints
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthEndpoints {
    /// The session authentication endpoint
    pub session_auth: reqwest::Url,
    /// The key manager authentication endpoint
    pub key_manager_auth: reqwest::Url,
}

impl ProxyConfig {
    /// Constructs a configuration with the default endpoint paths and timeouts
    pub fn new(session_auth_url: impl Into<String>, key_manager_url: impl Into<String>) -> Self {
        Self {
            session_auth_url: session_auth_url.into(),
            key_manager_url: key_manager_url.into(),
            session_auth_path: default_session_auth_path(),
            key_manager_auth_path: default_key_manager_auth_path(),
            timeouts: Timeouts::default(),
        }
    }

    /// Checks that both authenticators are configured and resolves their endpoints
    pub fn validate(&self) -> Result<AuthEndpoints, ConfigError> {
        Ok(AuthEndpoints {
            session_auth: resolve(
                "session_auth_url",
                &self.session_auth_url,
                &self.session_auth_path,
            )?,
            key_manager_auth: resolve(
                "key_manager_url",
                &self.key_manager_url,
                &self.key_manager_auth_path,
            )?,
        })
    }
}

fn resolve(key: &'static str, base: &str, path: &str) -> Result<reqwest::Url, ConfigError> {
    let base = base.trim();
    if base.is_empty() {
        return Err(ConfigError::Missing { key });
    }

    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    joined
        .parse()
        .map_err(|source| ConfigError::InvalidUrl { key, source })
}

/// An error in the proxy configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required URL was not configured
    #[error("no configuration found for the key {key}")]
    Missing {
        /// The configuration key
        key: &'static str,
    },
    /// A configured URL could not be parsed
    #[error("the value configured for {key} is not a valid URL")]
    InvalidUrl {
        /// The configuration key
        key: &'static str,
        /// The parse failure
        source: url::ParseError,
    },
    /// The default transport could not be built
    #[error("unable to build the proxy's default transport")]
    Transport(#[from] crate::CredentialError),
}
