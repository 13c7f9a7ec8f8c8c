//! Credential material used to prove an identity to the platform

use std::{fmt, path::Path, time::Duration};

use thiserror::Error;

/// The credential material registered for an identity
///
/// The platform authenticates integrations through mutual TLS, so the
/// material is a client certificate chain and its private key. Material
/// without a certificate produces a plain HTTPS transport, which is useful
/// when the authenticators accept other proofs or in tests.
#[derive(Clone, Default)]
pub struct CredentialMaterial {
    identity: Option<reqwest::Identity>,
}

impl CredentialMaterial {
    /// Credential material without a client certificate
    pub const fn none() -> Self {
        Self { identity: None }
    }

    /// Loads a PEM bundle holding the certificate chain and the private key
    pub fn from_pem(pem: &[u8]) -> Result<Self, CredentialError> {
        let identity = reqwest::Identity::from_pem(pem).map_err(CredentialError::InvalidPem)?;
        Ok(Self {
            identity: Some(identity),
        })
    }

    /// Reads a PEM bundle from the filesystem
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref();
        let pem = std::fs::read(path).map_err(|source| CredentialError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&pem)
    }

    /// Whether the material carries a client certificate
    #[inline]
    pub fn has_client_certificate(&self) -> bool {
        self.identity.is_some()
    }

    pub(crate) fn build_client(
        &self,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<reqwest::Client, CredentialError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("tether_tokens/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(request_timeout);

        if let Some(identity) = &self.identity {
            builder = builder.identity(identity.clone());
        }

        builder.build().map_err(CredentialError::Client)
    }
}

impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("client_certificate", &self.has_client_certificate())
            .finish()
    }
}

/// An error while loading credential material or building a transport from it
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The PEM bundle could not be parsed into a certificate and key
    #[error("unable to parse client certificate bundle")]
    InvalidPem(#[source] reqwest::Error),
    /// The PEM bundle could not be read
    #[error("unable to read client certificate bundle from {path}")]
    Read {
        /// The path that was read
        path: String,
        /// The underlying IO error
        source: std::io::Error,
    },
    /// The HTTP client could not be constructed
    #[error("unable to build HTTP client")]
    Client(#[source] reqwest::Error),
}
