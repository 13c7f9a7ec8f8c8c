//! An authenticator that uses the platform's certificate authentication endpoints

use std::{fmt, marker::PhantomData};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use super::Authenticator;
use crate::IdentityNameRef;

mod dto;

/// Default path of the session authentication endpoint
pub const SESSION_AUTH_PATH: &str = "/sessionauth/v1/authenticate";

/// Default path of the key manager authentication endpoint
pub const KEY_MANAGER_AUTH_PATH: &str = "/keyauth/v1/authenticate";

/// Authenticates an identity by presenting its client certificate to a
/// platform authentication endpoint
///
/// The endpoint answers with a JSON body of the form
/// `{"name": "sessionToken", "token": "…"}`; the token is converted into `T`.
pub struct PlatformAuthenticator<T> {
    url: reqwest::Url,
    token_type: PhantomData<fn() -> T>,
}

impl<T> PlatformAuthenticator<T> {
    /// Constructs an authenticator posting to `url`
    pub fn new(url: reqwest::Url) -> Self {
        Self {
            url,
            token_type: PhantomData,
        }
    }

    /// The endpoint this authenticator posts to
    #[inline]
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

impl<T> Clone for PlatformAuthenticator<T> {
    fn clone(&self) -> Self {
        Self::new(self.url.clone())
    }
}

impl<T> fmt::Debug for PlatformAuthenticator<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PlatformAuthenticator")
            .field("url", &self.url.as_str())
            .finish()
    }
}

#[async_trait]
impl<T> Authenticator<T> for PlatformAuthenticator<T>
where
    T: From<String> + Send,
{
    async fn authenticate(
        &self,
        identity: &IdentityNameRef,
        client: &reqwest::Client,
    ) -> Result<T, AuthenticateError> {
        request_token(client, &self.url, identity).await.map(T::from)
    }
}

/// An error while attempting to obtain a token from a platform authenticator
#[derive(Debug, Error)]
pub enum AuthenticateError {
    /// The authenticator answered with a non-success status
    #[error("authenticator rejected the request with status {status}: {body}")]
    Rejected {
        /// The status returned by the authenticator
        status: StatusCode,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authenticator")]
    TokenBody(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyRead(#[source] reqwest::Error),
    /// Unable to send a token request to the authenticator
    #[error("error sending request to authenticator")]
    RequestSend(#[source] reqwest::Error),
}

impl AuthenticateError {
    /// The status returned by the authenticator, if it answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::BodyRead(err) | Self::RequestSend(err) => err.status(),
            Self::TokenBody(_) => None,
        }
    }
}

#[tracing::instrument(
    err,
    skip(client, url, identity),
    fields(url = %url, identity = %identity),
)]
async fn request_token(
    client: &reqwest::Client,
    url: &reqwest::Url,
    identity: &IdentityNameRef,
) -> Result<String, AuthenticateError> {
    tracing::trace!("requesting token from authenticator");

    let resp = client
        .post(url.clone())
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(AuthenticateError::RequestSend)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from authenticator"
    );

    if !status.is_success() {
        let body = resp.text().await.map_err(AuthenticateError::BodyRead)?;
        return Err(AuthenticateError::Rejected { status, body });
    }

    let body = resp.bytes().await.map_err(AuthenticateError::BodyRead)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    tracing::info!(
        token.name = resp.name.as_deref().unwrap_or("<unnamed>"),
        "received new token"
    );

    Ok(resp.token)
}
