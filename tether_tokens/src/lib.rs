//! Per-identity session management for platform integrations
//!
//! Integrations call the platform on behalf of an _identity_, a registered bot,
//! integration or user. Each identity proves itself with credential material (a
//! client certificate) through a two-step handshake: a session authenticator
//! issues a short-lived session token and a key manager authenticator issues a
//! secondary token. The pair is kept as an [`AuthenticationToken`].
//!
//! The [`AuthenticationProxy`] owns the state of every identity. Tokens do not
//! expire on a timer. Expiry is detected reactively, when a call made with a
//! token is answered with `401 Unauthorized`; the caller then asks the proxy to
//! [re-authenticate][AuthenticationProxy::reauthenticate_or_throw]. Callers
//! that observe the same expired token at the same time share one handshake,
//! and a `403 Forbidden` invalidates the identity instead of renewing it.
//!
//! ```
//! use std::sync::Arc;
//! use reqwest::StatusCode;
//! use tether_tokens::{
//!     sources::ConstAuthenticator, AuthenticationProxy, CredentialMaterial, IdentityName,
//!     KeyManagerToken, SessionToken, Timeouts,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let proxy = AuthenticationProxy::new(
//!     Arc::new(ConstAuthenticator::new(SessionToken::from_static("session"))),
//!     Arc::new(ConstAuthenticator::new(KeyManagerToken::from_static("key-manager"))),
//!     Timeouts::default(),
//! )?;
//!
//! let bot = IdentityName::from_static("bot1");
//! proxy.register_identity(bot.clone(), &CredentialMaterial::none())?;
//! let token = proxy.authenticate(&bot).await?;
//!
//! // A call made with `token` came back with a 401
//! let transport = proxy
//!     .reauthenticate_or_throw(&bot, &token, StatusCode::UNAUTHORIZED, "session expired")
//!     .await?;
//!
//! tracing::info!(
//!     token = format_args!("{:#?}", transport.token.session_token()),
//!     "renewed session token"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! Against the real platform, the proxy is built from a [`ProxyConfig`] with
//! [`AuthenticationProxy::from_config`], which uses
//! [`PlatformAuthenticator`][sources::PlatformAuthenticator]s for both steps.
//! The `handshake` example shows this set up end to end.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod config;
mod credentials;
mod proxy;
pub mod sources;
mod tokens;

pub use braids::*;
pub use config::{AuthEndpoints, ConfigError, ProxyConfig, Timeouts};
pub use credentials::{CredentialError, CredentialMaterial};
pub use proxy::{
    no_longer_entitled, AuthenticationError, AuthenticationProxy, BoxError, ReauthError,
    Transport, UnregisteredIdentity,
};
pub use tokens::{AuthenticationState, AuthenticationToken};
