//! Authenticators for the two handshake steps

use std::fmt;

use async_trait::async_trait;

use crate::IdentityNameRef;

pub mod platform;

pub use platform::{AuthenticateError, PlatformAuthenticator};

/// One step of the authentication handshake
///
/// The proxy runs the session step and then the key manager step, each
/// through an authenticator producing the corresponding token type. The
/// `client` is the identity's transport, carrying its client certificate.
#[async_trait]
pub trait Authenticator<T>: fmt::Debug + Send + Sync {
    /// Requests a new token for `identity`
    async fn authenticate(
        &self,
        identity: &IdentityNameRef,
        client: &reqwest::Client,
    ) -> Result<T, AuthenticateError>;
}

/// An authenticator that always issues the same token
///
/// Useful for local development against a platform stub.
#[derive(Clone, Debug)]
pub struct ConstAuthenticator<T> {
    token: T,
}

impl<T> ConstAuthenticator<T> {
    /// Constructs an authenticator issuing `token`
    pub fn new(token: impl Into<T>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl<T> Authenticator<T> for ConstAuthenticator<T>
where
    T: Clone + fmt::Debug + Send + Sync,
{
    async fn authenticate(
        &self,
        identity: &IdentityNameRef,
        _: &reqwest::Client,
    ) -> Result<T, AuthenticateError> {
        tracing::trace!(%identity, "issuing constant token");
        Ok(self.token.clone())
    }
}
