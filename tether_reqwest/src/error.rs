use reqwest::{header::HeaderMap, StatusCode};
use tether_tokens::{ReauthError, UnregisteredIdentity};
use thiserror::Error;

/// Message used when a failed call came back without a body
pub const GENERIC_FAILURE: &str = "Failed to call API";

/// A call answered with a non-success status
///
/// Carries everything needed to classify the failure again without another
/// round trip.
#[derive(Clone, Debug, Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    /// The status of the response
    pub status: StatusCode,
    /// The response body, or a generic message if it was empty
    pub message: String,
    /// The response headers
    pub headers: HeaderMap,
    /// The raw response body, if there was one
    pub raw_body: Option<String>,
}

impl ApiError {
    /// Constructs an error from a response
    pub fn new(status: StatusCode, headers: HeaderMap, body: String) -> Self {
        if body.is_empty() {
            Self {
                status,
                message: GENERIC_FAILURE.to_owned(),
                headers,
                raw_body: None,
            }
        } else {
            Self {
                status,
                message: body.clone(),
                headers,
                raw_body: Some(body),
            }
        }
    }
}

/// An error while executing a call
#[derive(Debug, Error)]
pub enum CallError {
    /// The request could not be completed before a response was received
    #[error("Can't reach {base_url}")]
    Connectivity {
        /// The base URL of the unreachable API
        base_url: String,
        /// The transport failure
        #[source]
        source: reqwest::Error,
    },
    /// The call was still unauthorized after authenticating again
    #[error("call still unauthorized after authenticating again")]
    Unauthorized(#[source] ApiError),
    /// The identity lost its entitlement and has been invalidated
    #[error("identity is no longer entitled")]
    Forbidden(#[source] ApiError),
    /// The call failed with any other status
    #[error("call failed with status {}", .0.status)]
    Api(#[source] ApiError),
    /// The response body could not be deserialized
    #[error("unable to deserialize response body")]
    Deserialization {
        /// The deserialization failure
        #[source]
        source: serde_json::Error,
        /// The body as received
        raw_body: String,
    },
    /// The request body could not be serialized
    #[error("unable to serialize request body")]
    RequestSerialization(#[source] serde_json::Error),
    /// Authenticating again after an expired session failed
    #[error(transparent)]
    Reauthentication(#[from] ReauthError),
    /// The identity making the call is not registered
    #[error(transparent)]
    Unregistered(#[from] UnregisteredIdentity),
    /// The request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl CallError {
    /// The status of the response that caused the failure, if there was one
    pub fn status(&self) -> Option<StatusCode> {
        self.api_error().map(|err| err.status)
    }

    /// The failed response, if the failure came from one
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Unauthorized(err) | Self::Forbidden(err) | Self::Api(err) => Some(err),
            _ => None,
        }
    }
}
