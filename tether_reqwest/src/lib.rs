//! Authenticated calls to the platform API that survive session expiry
//!
//! A [`CallExecutor`] performs one logical `GET`, `POST`, `PUT` or `DELETE`
//! against a path under a base URL. Each request carries the caller's session
//! token in the `sessionToken` header, attached by the
//! [`SessionTokenMiddleware`]. When the platform answers `401 Unauthorized`,
//! the executor asks its [`CredentialSource`] to authenticate again and sends
//! the request once more. When the platform answers `403 Forbidden`, the
//! identity is invalidated and the call fails without a retry.
//!
//! Calls on behalf of an identity registered with an
//! [`AuthenticationProxy`](tether_tokens::AuthenticationProxy) use
//! [`ProxyCredentials`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_reqwest::{CallExecutor, ExecutorConfig, Params, ProxyCredentials, TracingHooks};
//! use tether_tokens::{AuthenticationProxy, CredentialMaterial, IdentityName, ProxyConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let proxy = Arc::new(AuthenticationProxy::from_config(&ProxyConfig::new(
//!     "https://pod.example.com:8444",
//!     "https://km.example.com:8444",
//! ))?);
//!
//! let bot = IdentityName::from_static("jirawebhook");
//! proxy.register_identity(bot.clone(), &CredentialMaterial::from_pem_file("bot.pem")?)?;
//!
//! let executor = CallExecutor::from_config(
//!     &ExecutorConfig::new("https://pod.example.com/pod"),
//!     ProxyCredentials::new(proxy, bot),
//! )?
//! .with_hooks(TracingHooks);
//!
//! let info: Option<serde_json::Value> = executor
//!     .get("/v2/sessioninfo", &Params::new(), &Params::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! An identity that never authenticated has no session token. Its first call
//! is answered with a `401`, which triggers the handshake, so explicit
//! authentication up front is optional.
//!
//! # Hooks
//!
//! [`CallHooks`] run once before and once after every logical call, however
//! many requests the call needed and however it ended, including by panic or
//! by being dropped. [`TracingHooks`] log each call, [`MetricsHooks`] report to
//! an [`ApiMetrics`] sink and [`TraceIdHooks`] send an `X-Trace-Id` header.
//! Hooks compose as tuples.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod config;
mod credentials;
mod error;
mod executor;
pub mod hooks;
mod json;
mod middleware;
mod params;

pub use config::ExecutorConfig;
pub use credentials::{CredentialSource, ProxyCredentials};
pub use error::{ApiError, CallError, GENERIC_FAILURE};
pub use executor::CallExecutor;
pub use hooks::{
    ApiMetrics, CallContext, CallHooks, MetricsHooks, NoopHooks, TraceIdHooks, TracingHooks,
};
pub use json::Discard;
pub use middleware::{InvalidTokenHeader, SessionTokenMiddleware, KEY_MANAGER_TOKEN, SESSION_TOKEN};
pub use params::{escape_path_segment, Params};
