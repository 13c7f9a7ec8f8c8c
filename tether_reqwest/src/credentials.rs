use std::sync::Arc;

use async_trait::async_trait;
use tether_tokens::{
    AuthenticationProxy, AuthenticationToken, IdentityName, ReauthError, Transport,
    UnregisteredIdentity,
};

use crate::ApiError;

/// Supplies the transport a call is made with
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// A transport bound to the current credentials
    fn transport(&self) -> Result<Transport, UnregisteredIdentity>;

    /// Reacts to a call made with `stale` failing with `cause`
    ///
    /// Returns a transport bound to renewed credentials if the failure can be
    /// recovered from by authenticating again.
    async fn renew(
        &self,
        stale: &AuthenticationToken,
        cause: &ApiError,
    ) -> Result<Transport, ReauthError>;
}

#[async_trait]
impl<S: CredentialSource + ?Sized> CredentialSource for Arc<S> {
    fn transport(&self) -> Result<Transport, UnregisteredIdentity> {
        (**self).transport()
    }

    async fn renew(
        &self,
        stale: &AuthenticationToken,
        cause: &ApiError,
    ) -> Result<Transport, ReauthError> {
        (**self).renew(stale, cause).await
    }
}

/// Calls on behalf of one identity registered with an [`AuthenticationProxy`]
#[derive(Clone, Debug)]
pub struct ProxyCredentials {
    proxy: Arc<AuthenticationProxy>,
    identity: IdentityName,
}

impl ProxyCredentials {
    /// Constructs a source for `identity`
    pub fn new(proxy: Arc<AuthenticationProxy>, identity: IdentityName) -> Self {
        Self { proxy, identity }
    }

    /// The identity calls are made for
    #[inline]
    pub fn identity(&self) -> &IdentityName {
        &self.identity
    }
}

#[async_trait]
impl CredentialSource for ProxyCredentials {
    fn transport(&self) -> Result<Transport, UnregisteredIdentity> {
        self.proxy.http_client_for_user(&self.identity)
    }

    async fn renew(
        &self,
        stale: &AuthenticationToken,
        cause: &ApiError,
    ) -> Result<Transport, ReauthError> {
        self.proxy
            .reauthenticate_or_throw(&self.identity, stale, cause.status, cause.clone())
            .await
    }
}
