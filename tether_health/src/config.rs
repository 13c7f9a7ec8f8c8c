use std::time::Duration;

use serde::Deserialize;
use tether_clock::DurationSecs;

/// A service whose health is probed
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// The name the service is queried by
    pub name: String,
    /// The URL answering the health check
    pub health_url: String,
    /// The oldest version of the service that integrations support
    #[serde(default)]
    pub min_version: Option<String>,
}

/// Configuration of health probing
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthConfig {
    /// How long a probe result is reused, in seconds
    pub ttl_secs: u64,
    /// Time allowed to connect to a service, in milliseconds
    pub connect_timeout_ms: u64,
    /// Time allowed for a service to answer, in milliseconds
    pub read_timeout_ms: u64,
    /// The services to probe
    pub services: Vec<ServiceConfig>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 20,
            connect_timeout_ms: 1_000,
            read_timeout_ms: 5_000,
            services: Vec::new(),
        }
    }
}

impl HealthConfig {
    /// How long a probe result is reused
    #[inline]
    pub fn ttl(&self) -> DurationSecs {
        DurationSecs(self.ttl_secs)
    }

    /// The connect timeout
    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The read timeout
    #[inline]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Adds a service to probe
    #[must_use]
    pub fn with_service(
        mut self,
        name: impl Into<String>,
        health_url: impl Into<String>,
        min_version: Option<&str>,
    ) -> Self {
        self.services.push(ServiceConfig {
            name: name.into(),
            health_url: health_url.into(),
            min_version: min_version.map(str::to_owned),
        });
        self
    }
}
