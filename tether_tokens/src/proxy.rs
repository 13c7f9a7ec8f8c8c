//! Per-identity session state and re-authentication arbitration

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use arc_swap::ArcSwap;
use reqwest::StatusCode;
use thiserror::Error;

use crate::{
    config::{ProxyConfig, Timeouts},
    sources::{AuthenticateError, Authenticator, PlatformAuthenticator},
    AuthenticationState, AuthenticationToken, ConfigError, CredentialError, CredentialMaterial,
    IdentityName, IdentityNameRef, KeyManagerToken, SessionToken, SessionTokenRef,
};

/// A boxed error, used to carry the failure that triggered a re-authentication
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An HTTP client bound to an identity's current credentials
///
/// The client carries the identity's client certificate, if one was
/// registered. The token is a snapshot taken when the transport was handed
/// out; it does not follow later re-authentications.
#[derive(Clone, Debug)]
pub struct Transport {
    /// The client to send requests with
    pub client: reqwest::Client,
    /// The credentials to attach to each request
    pub token: AuthenticationToken,
}

#[derive(Debug)]
struct IdentitySlot {
    state: ArcSwap<AuthenticationState>,
    client: ArcSwap<reqwest::Client>,
    lock: tokio::sync::Mutex<()>,
}

impl IdentitySlot {
    fn transport(&self) -> Transport {
        Transport {
            client: reqwest::Client::clone(&self.client.load()),
            token: self.state.load().token().clone(),
        }
    }
}

/// Owns the authentication state of every registered identity
///
/// Reads of an identity's token are lock free. Authentication of an
/// identity is serialized behind that identity's own lock, so unrelated
/// identities never wait on each other, and any number of callers that
/// observe an expired token at the same time share a single handshake.
///
/// ```
/// # use std::sync::Arc;
/// # use tether_tokens::{
/// #     sources::ConstAuthenticator, AuthenticationProxy, CredentialMaterial, IdentityName,
/// #     KeyManagerToken, SessionToken, Timeouts,
/// # };
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let proxy = AuthenticationProxy::new(
///     Arc::new(ConstAuthenticator::new(SessionToken::from_static("session"))),
///     Arc::new(ConstAuthenticator::new(KeyManagerToken::from_static("key-manager"))),
///     Timeouts::default(),
/// )?;
///
/// let bot = IdentityName::from_static("bot1");
/// proxy.register_identity(bot.clone(), &CredentialMaterial::none())?;
/// assert!(!proxy.is_authenticated(&bot)?);
///
/// proxy.authenticate(&bot).await?;
/// assert!(proxy.is_authenticated(&bot)?);
/// # Ok(())
/// # }
/// ```
pub struct AuthenticationProxy {
    identities: RwLock<HashMap<IdentityName, Arc<IdentitySlot>>>,
    session: Arc<dyn Authenticator<SessionToken>>,
    key_manager: Arc<dyn Authenticator<KeyManagerToken>>,
    timeouts: Timeouts,
    default_client: reqwest::Client,
}

impl std::fmt::Debug for AuthenticationProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("AuthenticationProxy")
            .field("identities", &self.identities())
            .field("session", &self.session)
            .field("key_manager", &self.key_manager)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl AuthenticationProxy {
    /// Constructs a proxy running the handshake through the given authenticators
    pub fn new(
        session: Arc<dyn Authenticator<SessionToken>>,
        key_manager: Arc<dyn Authenticator<KeyManagerToken>>,
        timeouts: Timeouts,
    ) -> Result<Self, CredentialError> {
        let default_client =
            CredentialMaterial::none().build_client(timeouts.connect(), timeouts.request())?;

        Ok(Self {
            identities: RwLock::new(HashMap::new()),
            session,
            key_manager,
            timeouts,
            default_client,
        })
    }

    /// Constructs a proxy authenticating against the platform endpoints in `config`
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let endpoints = config.validate()?;
        tracing::debug!(
            session_auth = %endpoints.session_auth,
            key_manager_auth = %endpoints.key_manager_auth,
            "configuring authentication proxy"
        );

        Ok(Self::new(
            Arc::new(PlatformAuthenticator::<SessionToken>::new(
                endpoints.session_auth,
            )),
            Arc::new(PlatformAuthenticator::<KeyManagerToken>::new(
                endpoints.key_manager_auth,
            )),
            config.timeouts,
        )?)
    }

    /// Registers an identity and the credential material that proves it
    ///
    /// Registering an identity again replaces its transport but keeps its
    /// authentication state.
    pub fn register_identity(
        &self,
        identity: IdentityName,
        material: &CredentialMaterial,
    ) -> Result<(), CredentialError> {
        let client =
            material.build_client(self.timeouts.connect(), self.timeouts.request())?;

        let mut identities = self
            .identities
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(slot) = identities.get(&identity) {
            tracing::debug!(%identity, "replacing credential material of registered identity");
            slot.client.store(Arc::new(client));
        } else {
            tracing::debug!(
                %identity,
                client_certificate = material.has_client_certificate(),
                "registering identity"
            );
            identities.insert(
                identity,
                Arc::new(IdentitySlot {
                    state: ArcSwap::from_pointee(AuthenticationState::UNAUTHENTICATED),
                    client: ArcSwap::from_pointee(client),
                    lock: tokio::sync::Mutex::new(()),
                }),
            );
        }

        Ok(())
    }

    /// The names of all registered identities, in sorted order
    pub fn identities(&self) -> Vec<IdentityName> {
        let mut names: Vec<_> = self
            .identities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn slot(&self, identity: &IdentityNameRef) -> Result<Arc<IdentitySlot>, UnregisteredIdentity> {
        self.identities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
            .ok_or_else(|| UnregisteredIdentity {
                identity: identity.to_owned(),
            })
    }

    /// The identity's current token
    pub fn token(&self, identity: &IdentityNameRef) -> Result<AuthenticationToken, UnregisteredIdentity> {
        Ok(self.slot(identity)?.state.load().token().clone())
    }

    /// Whether the identity's current token is considered authorized
    pub fn is_authenticated(&self, identity: &IdentityNameRef) -> Result<bool, UnregisteredIdentity> {
        Ok(self.slot(identity)?.state.load().is_authenticated())
    }

    /// Marks the identity as unauthenticated, retaining its last token
    pub fn invalidate(&self, identity: &IdentityNameRef) -> Result<(), UnregisteredIdentity> {
        let slot = self.slot(identity)?;
        slot.state.rcu(|state| state.invalidated());
        tracing::debug!(%identity, "invalidated identity");
        Ok(())
    }

    /// A transport bound to the identity's current credentials
    pub fn http_client_for_user(&self, identity: &IdentityNameRef) -> Result<Transport, UnregisteredIdentity> {
        Ok(self.slot(identity)?.transport())
    }

    /// A transport for whichever identity currently holds `session_token`
    ///
    /// Falls back to the proxy's default client, without a client
    /// certificate, when no registered identity holds the token.
    pub fn http_client_for_session_token(&self, session_token: &SessionTokenRef) -> Transport {
        let owner = self
            .identities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|slot| slot.state.load().token().session_token() == Some(session_token))
            .cloned();

        match owner {
            Some(slot) => slot.transport(),
            None => Transport {
                client: self.default_client.clone(),
                token: AuthenticationToken::from_session_token(session_token.to_owned()),
            },
        }
    }

    /// Runs the two-step handshake for the identity
    ///
    /// On failure of either step the identity is left without credentials.
    #[tracing::instrument(err, skip(self, identity), fields(identity = %identity))]
    pub async fn authenticate(
        &self,
        identity: &IdentityNameRef,
    ) -> Result<AuthenticationToken, AuthenticationError> {
        let slot = self.slot(identity)?;
        let _guard = slot.lock.lock().await;
        self.handshake(identity, &slot).await
    }

    async fn handshake(
        &self,
        identity: &IdentityNameRef,
        slot: &IdentitySlot,
    ) -> Result<AuthenticationToken, AuthenticationError> {
        let result = self.request_tokens(identity, slot).await;

        match &result {
            Ok(token) => {
                slot.state
                    .store(Arc::new(AuthenticationState::authenticated(token.clone())));
                tracing::info!(
                    session_token = ?token.session_token(),
                    "identity authenticated"
                );
            }
            Err(_) => {
                slot.state
                    .store(Arc::new(AuthenticationState::UNAUTHENTICATED));
            }
        }

        result
    }

    async fn request_tokens(
        &self,
        identity: &IdentityNameRef,
        slot: &IdentitySlot,
    ) -> Result<AuthenticationToken, AuthenticationError> {
        let client = reqwest::Client::clone(&slot.client.load());

        let session_token = self
            .session
            .authenticate(identity, &client)
            .await
            .map_err(|source| AuthenticationError::SessionToken {
                identity: identity.to_owned(),
                source,
            })?;

        let key_manager_token = self
            .key_manager
            .authenticate(identity, &client)
            .await
            .map_err(|source| AuthenticationError::KeyManagerToken {
                identity: identity.to_owned(),
                source,
            })?;

        Ok(AuthenticationToken::new(session_token, key_manager_token))
    }

    /// Decides whether a failed call can be recovered by authenticating again
    ///
    /// `stale` is the token the failed call was made with. A forbidden
    /// status invalidates the identity and is never recovered. An
    /// unauthorized status re-authenticates the identity, unless another
    /// caller already replaced `stale` while this one waited, and returns a
    /// transport bound to the fresh credentials. Any other status is not
    /// recoverable.
    #[tracing::instrument(
        skip(self, identity, stale, status, cause),
        fields(identity = %identity, status = status.as_u16()),
    )]
    pub async fn reauthenticate_or_throw(
        &self,
        identity: &IdentityNameRef,
        stale: &AuthenticationToken,
        status: StatusCode,
        cause: impl Into<BoxError>,
    ) -> Result<Transport, ReauthError> {
        let slot = self.slot(identity)?;

        if no_longer_entitled(status) {
            slot.state.rcu(|state| state.invalidated());
            tracing::warn!("identity is no longer entitled");
            return Err(ReauthError::NoLongerEntitled {
                identity: identity.to_owned(),
                status,
                cause: cause.into(),
            });
        }

        if status != StatusCode::UNAUTHORIZED {
            return Err(ReauthError::NotRecoverable {
                identity: identity.to_owned(),
                status,
                cause: cause.into(),
            });
        }

        let _guard = slot.lock.lock().await;

        let current = slot.state.load_full();
        if current.is_authenticated() && current.token() != stale {
            tracing::debug!("credentials already renewed by a concurrent caller");
            return Ok(slot.transport());
        }

        tracing::debug!("credentials expired, authenticating again");
        self.handshake(identity, &slot)
            .await
            .map_err(|source| ReauthError::Authentication {
                identity: identity.to_owned(),
                source,
            })?;

        Ok(slot.transport())
    }
}

/// Whether the status means the identity has lost its entitlement entirely
#[inline]
pub fn no_longer_entitled(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN
}

/// The identity was never registered with the proxy
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("identity {identity} is not registered")]
pub struct UnregisteredIdentity {
    /// The unknown identity
    pub identity: IdentityName,
}

/// An error while running the two-step handshake
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// The identity was never registered
    #[error(transparent)]
    Unregistered(#[from] UnregisteredIdentity),
    /// The session authenticator failed
    #[error("unable to obtain a session token for {identity}")]
    SessionToken {
        /// The identity being authenticated
        identity: IdentityName,
        /// The failure of the session authenticator
        source: AuthenticateError,
    },
    /// The key manager authenticator failed
    #[error("unable to obtain a key manager token for {identity}")]
    KeyManagerToken {
        /// The identity being authenticated
        identity: IdentityName,
        /// The failure of the key manager authenticator
        source: AuthenticateError,
    },
}

/// A failed call that could not be recovered by authenticating again
#[derive(Debug, Error)]
pub enum ReauthError {
    /// The identity was never registered
    #[error(transparent)]
    Unregistered(#[from] UnregisteredIdentity),
    /// The identity lost its entitlement and has been invalidated
    #[error("identity {identity} is no longer entitled (status {status})")]
    NoLongerEntitled {
        /// The identity that lost its entitlement
        identity: IdentityName,
        /// The status of the failed call
        status: StatusCode,
        /// The failure of the call
        #[source]
        cause: BoxError,
    },
    /// The status of the failed call does not indicate expired credentials
    #[error("status {status} for {identity} is not recoverable by authenticating again")]
    NotRecoverable {
        /// The identity the call was made for
        identity: IdentityName,
        /// The status of the failed call
        status: StatusCode,
        /// The failure of the call
        #[source]
        cause: BoxError,
    },
    /// Authenticating again failed
    #[error("unable to authenticate {identity} again")]
    Authentication {
        /// The identity being authenticated
        identity: IdentityName,
        /// The failure of the handshake
        source: AuthenticationError,
    },
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::sources::ConstAuthenticator;

    #[derive(Debug, Default)]
    struct CountingSessions {
        issued: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Authenticator<SessionToken> for CountingSessions {
        async fn authenticate(
            &self,
            _: &IdentityNameRef,
            _: &reqwest::Client,
        ) -> Result<SessionToken, AuthenticateError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            Ok(SessionToken::from(format!("session-{n}")))
        }
    }

    #[derive(Debug)]
    struct Rejecting;

    #[async_trait]
    impl<T: Send + 'static> Authenticator<T> for Rejecting {
        async fn authenticate(
            &self,
            _: &IdentityNameRef,
            _: &reqwest::Client,
        ) -> Result<T, AuthenticateError> {
            Err(AuthenticateError::Rejected {
                status: StatusCode::UNAUTHORIZED,
                body: "certificate revoked".into(),
            })
        }
    }

    fn bot() -> IdentityName {
        IdentityName::from_static("bot1")
    }

    fn key_manager() -> Arc<dyn Authenticator<KeyManagerToken>> {
        Arc::new(ConstAuthenticator::new(KeyManagerToken::from_static(
            "key-manager",
        )))
    }

    fn proxy_with(sessions: Arc<CountingSessions>) -> AuthenticationProxy {
        let proxy = AuthenticationProxy::new(sessions, key_manager(), Timeouts::default()).unwrap();
        proxy
            .register_identity(bot(), &CredentialMaterial::none())
            .unwrap();
        proxy
    }

    #[test]
    fn unregistered_identity_is_reported() {
        let proxy = proxy_with(Arc::default());
        let err = proxy
            .token(&IdentityName::from_static("stranger"))
            .unwrap_err();
        assert_eq!(err.identity.as_str(), "stranger");
    }

    #[test]
    fn registration_starts_unauthenticated_and_is_idempotent() {
        let proxy = proxy_with(Arc::default());
        proxy
            .register_identity(bot(), &CredentialMaterial::none())
            .unwrap();

        assert_eq!(proxy.identities(), vec![bot()]);
        assert!(!proxy.is_authenticated(&bot()).unwrap());
        assert!(proxy.token(&bot()).unwrap().is_void());
    }

    #[tokio::test]
    async fn authenticate_stores_both_tokens() {
        let proxy = proxy_with(Arc::default());
        let token = proxy.authenticate(&bot()).await.unwrap();

        assert_eq!(token.session_token().unwrap().as_str(), "session-1");
        assert_eq!(token.key_manager_token().unwrap().as_str(), "key-manager");
        assert!(proxy.is_authenticated(&bot()).unwrap());
        assert_eq!(proxy.token(&bot()).unwrap(), token);
    }

    #[tokio::test]
    async fn invalidate_keeps_the_last_token() {
        let proxy = proxy_with(Arc::default());
        let token = proxy.authenticate(&bot()).await.unwrap();

        proxy.invalidate(&bot()).unwrap();

        assert!(!proxy.is_authenticated(&bot()).unwrap());
        assert_eq!(proxy.token(&bot()).unwrap(), token);
    }

    #[tokio::test]
    async fn transport_for_session_token_finds_its_owner() {
        let proxy = proxy_with(Arc::default());
        let token = proxy.authenticate(&bot()).await.unwrap();

        let transport = proxy.http_client_for_session_token(token.session_token().unwrap());
        assert_eq!(transport.token, token);

        let stranger = SessionToken::from_static("unknown");
        let transport = proxy.http_client_for_session_token(&stranger);
        assert_eq!(transport.token.session_token(), Some(&*stranger));
        assert_eq!(transport.token.key_manager_token(), None);
    }

    mod when_a_handshake_step_fails {
        use super::*;

        #[tokio::test]
        async fn a_failed_session_step_leaves_no_credentials() {
            let proxy =
                AuthenticationProxy::new(Arc::new(Rejecting), key_manager(), Timeouts::default())
                    .unwrap();
            proxy
                .register_identity(bot(), &CredentialMaterial::none())
                .unwrap();

            let err = proxy.authenticate(&bot()).await.unwrap_err();

            assert!(matches!(err, AuthenticationError::SessionToken { .. }));
            assert!(!proxy.is_authenticated(&bot()).unwrap());
            assert!(proxy.token(&bot()).unwrap().is_void());
        }

        #[tokio::test]
        async fn a_failed_key_manager_step_discards_the_session_token() {
            let proxy = AuthenticationProxy::new(
                Arc::new(CountingSessions::default()),
                Arc::new(Rejecting),
                Timeouts::default(),
            )
            .unwrap();
            proxy
                .register_identity(bot(), &CredentialMaterial::none())
                .unwrap();

            let err = proxy.authenticate(&bot()).await.unwrap_err();

            assert!(matches!(err, AuthenticationError::KeyManagerToken { .. }));
            assert_eq!(
                proxy.token(&bot()).unwrap(),
                AuthenticationToken::VOID,
            );
        }

        #[tokio::test]
        async fn a_failed_reauthentication_is_wrapped_once() {
            let proxy = AuthenticationProxy::new(
                Arc::new(CountingSessions::default()),
                Arc::new(Rejecting),
                Timeouts::default(),
            )
            .unwrap();
            proxy
                .register_identity(bot(), &CredentialMaterial::none())
                .unwrap();

            let err = proxy
                .reauthenticate_or_throw(
                    &bot(),
                    &AuthenticationToken::VOID,
                    StatusCode::UNAUTHORIZED,
                    "expired",
                )
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                ReauthError::Authentication {
                    source: AuthenticationError::KeyManagerToken { .. },
                    ..
                }
            ));
        }
    }

    mod when_a_call_fails {
        use super::*;

        #[tokio::test]
        async fn forbidden_invalidates_without_authenticating() {
            let sessions = Arc::new(CountingSessions::default());
            let proxy = proxy_with(sessions.clone());
            let token = proxy.authenticate(&bot()).await.unwrap();

            let err = proxy
                .reauthenticate_or_throw(&bot(), &token, StatusCode::FORBIDDEN, "forbidden")
                .await
                .unwrap_err();

            assert!(matches!(err, ReauthError::NoLongerEntitled { .. }));
            assert!(!proxy.is_authenticated(&bot()).unwrap());
            assert_eq!(proxy.token(&bot()).unwrap(), token);
            assert_eq!(sessions.issued.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn server_errors_are_not_recoverable() {
            let sessions = Arc::new(CountingSessions::default());
            let proxy = proxy_with(sessions.clone());
            let token = proxy.authenticate(&bot()).await.unwrap();

            let err = proxy
                .reauthenticate_or_throw(
                    &bot(),
                    &token,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "boom",
                )
                .await
                .unwrap_err();

            assert!(matches!(
                err,
                ReauthError::NotRecoverable { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
            ));
            assert!(proxy.is_authenticated(&bot()).unwrap());
            assert_eq!(sessions.issued.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn unauthorized_authenticates_again() {
            let proxy = proxy_with(Arc::default());
            let stale = proxy.authenticate(&bot()).await.unwrap();

            let transport = proxy
                .reauthenticate_or_throw(&bot(), &stale, StatusCode::UNAUTHORIZED, "expired")
                .await
                .unwrap();

            assert_eq!(
                transport.token.session_token().unwrap().as_str(),
                "session-2"
            );
            assert_eq!(proxy.token(&bot()).unwrap(), transport.token);
        }

        #[tokio::test]
        async fn concurrent_expirations_share_one_handshake() {
            let sessions = Arc::new(CountingSessions {
                issued: AtomicUsize::new(0),
                delay: Duration::from_millis(20),
            });
            let proxy = proxy_with(sessions.clone());
            let stale = proxy.authenticate(&bot()).await.unwrap();

            let bot = bot();
            let renew = || {
                proxy.reauthenticate_or_throw(&bot, &stale, StatusCode::UNAUTHORIZED, "expired")
            };
            let (a, b, c) = tokio::join!(renew(), renew(), renew());

            let a = a.unwrap();
            assert_eq!(a.token, b.unwrap().token);
            assert_eq!(a.token, c.unwrap().token);
            assert_eq!(sessions.issued.load(Ordering::SeqCst), 2);
        }
    }
}
