//! DTOs for interacting with the platform's authenticators

use serde::Deserialize;

/// A token as answered by a platform authenticator
///
/// Both handshake steps answer with the same shape, naming the kind of
/// token that was issued.
#[derive(Deserialize)]
pub(super) struct TokenResponse {
    #[serde(default)]
    pub name: Option<String>,
    pub token: String,
}
