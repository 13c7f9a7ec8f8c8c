//! Probes that check a single service

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tether_tokens::AuthenticationProxy;
use thiserror::Error;

use crate::{HealthConfig, HealthReport};

/// Checks the health of a named service
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probes `service`
    ///
    /// A service that cannot be reached is reported as down. An error means
    /// the service could not be checked at all.
    async fn probe(&self, service: &str) -> Result<HealthReport, ProbeError>;
}

#[async_trait]
impl<P: HealthProbe + ?Sized> HealthProbe for Arc<P> {
    async fn probe(&self, service: &str) -> Result<HealthReport, ProbeError> {
        (**self).probe(service).await
    }
}

/// A service could not be checked
#[derive(Debug, Error)]
pub enum ProbeError {
    /// No service is configured under the name
    #[error("no health check configured for service {0}")]
    UnknownService(String),
}

/// An error in the health configuration
#[derive(Debug, Error)]
pub enum HealthConfigError {
    /// A health URL could not be parsed
    #[error("health URL of service {service} is not a valid URL")]
    InvalidUrl {
        /// The misconfigured service
        service: String,
        /// The parse failure
        #[source]
        source: url::ParseError,
    },
    /// The HTTP client could not be constructed
    #[error("unable to build HTTP client")]
    Client(#[source] reqwest::Error),
}

#[derive(Clone, Debug)]
struct Target {
    health_url: reqwest::Url,
    min_version: Option<String>,
}

#[derive(Deserialize)]
struct HealthBody {
    #[serde(default)]
    version: Option<String>,
}

/// Probes services over HTTP
///
/// A service is up if its health URL answers `200 OK`; the `version` field of
/// a JSON body is reported as its current version. When built with an
/// [`AuthenticationProxy`], requests go through the transport of a registered
/// identity so that services requiring a client certificate can be checked.
pub struct HttpHealthProbe {
    targets: HashMap<String, Target>,
    client: reqwest::Client,
    read_timeout: Duration,
    proxy: Option<Arc<AuthenticationProxy>>,
}

impl fmt::Debug for HttpHealthProbe {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HttpHealthProbe")
            .field("services", &self.targets.keys().collect::<Vec<_>>())
            .field("read_timeout", &self.read_timeout)
            .field("proxy", &self.proxy.is_some())
            .finish()
    }
}

impl HttpHealthProbe {
    /// Constructs a probe for the services in `config`
    pub fn new(config: &HealthConfig) -> Result<Self, HealthConfigError> {
        let targets = config
            .services
            .iter()
            .map(|service| {
                let health_url = service
                    .health_url
                    .trim()
                    .parse::<reqwest::Url>()
                    .map_err(|source| HealthConfigError::InvalidUrl {
                        service: service.name.clone(),
                        source,
                    })?;

                Ok((
                    service.name.clone(),
                    Target {
                        health_url,
                        min_version: service.min_version.clone(),
                    },
                ))
            })
            .collect::<Result<_, HealthConfigError>>()?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("tether_health/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()
            .map_err(HealthConfigError::Client)?;

        Ok(Self {
            targets,
            client,
            read_timeout: config.read_timeout(),
            proxy: None,
        })
    }

    /// Sends probes through the transports of identities registered with `proxy`
    #[must_use]
    pub fn with_proxy(self, proxy: Arc<AuthenticationProxy>) -> Self {
        Self {
            proxy: Some(proxy),
            ..self
        }
    }

    fn client(&self) -> reqwest::Client {
        let identity_client = self.proxy.as_ref().and_then(|proxy| {
            proxy
                .identities()
                .iter()
                .find_map(|identity| proxy.http_client_for_user(identity).ok())
                .map(|transport| transport.client)
        });

        identity_client.unwrap_or_else(|| self.client.clone())
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    #[tracing::instrument(skip(self))]
    async fn probe(&self, service: &str) -> Result<HealthReport, ProbeError> {
        let target = self
            .targets
            .get(service)
            .ok_or_else(|| ProbeError::UnknownService(service.to_owned()))?;

        let response = self
            .client()
            .get(target.health_url.clone())
            .timeout(self.read_timeout)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "service unreachable");
                return Ok(HealthReport::down(target.min_version.clone()));
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(response.status = status.as_u16(), "service unhealthy");
            return Ok(HealthReport::down(target.min_version.clone()));
        }

        let version = match response.json::<HealthBody>().await {
            Ok(body) => body.version,
            Err(err) => {
                tracing::debug!(error = %err, "health response carried no version");
                None
            }
        };

        tracing::debug!(version = version.as_deref(), "service up");
        Ok(HealthReport::up(target.min_version.clone(), version))
    }
}
