//! Middleware attaching an identity's credentials to outgoing requests

use reqwest::{
    header::{HeaderName, HeaderValue},
    Request, Response,
};
use reqwest_middleware::{Middleware, Next, Result};
use tether_tokens::AuthenticationToken;
use thiserror::Error;

/// The header carrying the session token
pub const SESSION_TOKEN: HeaderName = HeaderName::from_static("sessiontoken");

/// The header carrying the key manager token
pub const KEY_MANAGER_TOKEN: HeaderName = HeaderName::from_static("keymanagertoken");

/// A middleware that injects a session token into outgoing requests
///
/// If a request already carries a `sessionToken` header by the time the
/// middleware executes, the existing value is left in place, allowing
/// overrides to be specified as required. A void token attaches nothing.
///
/// ```
/// use reqwest::Client;
/// use reqwest_middleware::ClientBuilder;
/// use tether_reqwest::SessionTokenMiddleware;
/// use tether_tokens::{AuthenticationToken, KeyManagerToken, SessionToken};
///
/// let token = AuthenticationToken::new(
///     SessionToken::from_static("session"),
///     KeyManagerToken::from_static("key-manager"),
/// );
///
/// let client = ClientBuilder::new(Client::default())
///     .with(SessionTokenMiddleware::new(token).with_key_manager_token())
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct SessionTokenMiddleware {
    token: AuthenticationToken,
    key_manager: bool,
}

impl SessionTokenMiddleware {
    /// Construct a new middleware attaching the session token of `token`
    pub fn new(token: AuthenticationToken) -> Self {
        Self {
            token,
            key_manager: false,
        }
    }

    /// Also attach the key manager token as a `keyManagerToken` header
    #[must_use]
    pub fn with_key_manager_token(self) -> Self {
        Self {
            key_manager: true,
            ..self
        }
    }
}

fn sensitive(value: &str) -> std::result::Result<HeaderValue, InvalidTokenHeader> {
    let mut value = HeaderValue::from_str(value).map_err(|_| InvalidTokenHeader)?;
    value.set_sensitive(true);
    Ok(value)
}

fn attach(
    req: &mut Request,
    name: HeaderName,
    value: Option<&str>,
) -> std::result::Result<(), InvalidTokenHeader> {
    let Some(value) = value else {
        return Ok(());
    };

    if let reqwest::header::Entry::Vacant(entry) = req.headers_mut().entry(name) {
        entry.insert(sensitive(value)?);
    }

    Ok(())
}

#[async_trait::async_trait]
impl Middleware for SessionTokenMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                session_token = ?self.token.session_token(),
                key_manager_token = self.key_manager,
                "attaching credentials"
            );
        }

        attach(
            &mut req,
            SESSION_TOKEN,
            self.token.session_token().map(|t| t.as_str()),
        )
        .map_err(reqwest_middleware::Error::middleware)?;

        if self.key_manager {
            attach(
                &mut req,
                KEY_MANAGER_TOKEN,
                self.token.key_manager_token().map(|t| t.as_str()),
            )
            .map_err(reqwest_middleware::Error::middleware)?;
        }

        next.run(req, extensions).await
    }
}

/// A token held characters that are not allowed in a header value
#[derive(Clone, Copy, Debug, Error)]
#[error("token is not a valid header value")]
pub struct InvalidTokenHeader;
