use super::{KeyManagerToken, KeyManagerTokenRef, SessionToken, SessionTokenRef};

/// The credential pair held for an identity
///
/// A token is immutable. Replacing credentials means replacing the whole
/// token, so a clone handed out to a caller can never be observed half
/// updated.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AuthenticationToken {
    session_token: Option<SessionToken>,
    key_manager_token: Option<KeyManagerToken>,
}

impl AuthenticationToken {
    /// The token of an identity that has never authenticated
    pub const VOID: AuthenticationToken = AuthenticationToken {
        session_token: None,
        key_manager_token: None,
    };

    /// Constructs a token from a freshly issued credential pair
    pub fn new(session_token: SessionToken, key_manager_token: KeyManagerToken) -> Self {
        Self {
            session_token: Some(session_token),
            key_manager_token: Some(key_manager_token),
        }
    }

    /// Constructs a token carrying only a session token
    ///
    /// Used for transports built for a session token whose owner is unknown.
    pub fn from_session_token(session_token: SessionToken) -> Self {
        Self {
            session_token: Some(session_token),
            key_manager_token: None,
        }
    }

    /// The same credentials with the session token replaced
    #[must_use]
    pub fn with_session_token(self, session_token: SessionToken) -> Self {
        Self {
            session_token: Some(session_token),
            ..self
        }
    }

    /// Gets the session token, if one was ever issued
    #[inline]
    pub fn session_token(&self) -> Option<&SessionTokenRef> {
        self.session_token.as_deref()
    }

    /// Gets the key manager token, if one was ever issued
    #[inline]
    pub fn key_manager_token(&self) -> Option<&KeyManagerTokenRef> {
        self.key_manager_token.as_deref()
    }

    /// Whether this is the [`VOID`][Self::VOID] token
    #[inline]
    pub fn is_void(&self) -> bool {
        self.session_token.is_none() && self.key_manager_token.is_none()
    }
}

impl Default for AuthenticationToken {
    fn default() -> Self {
        Self::VOID
    }
}

/// The authentication state of a single identity
///
/// `authenticated == false` does not imply that the token is void: an
/// invalidated identity keeps its last issued token until a successful
/// authentication replaces it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthenticationState {
    token: AuthenticationToken,
    authenticated: bool,
}

impl AuthenticationState {
    /// The state of a newly registered identity
    pub const UNAUTHENTICATED: AuthenticationState = AuthenticationState {
        token: AuthenticationToken::VOID,
        authenticated: false,
    };

    /// The state after a successful handshake
    pub fn authenticated(token: AuthenticationToken) -> Self {
        Self {
            token,
            authenticated: true,
        }
    }

    /// The same state with authorization revoked, retaining the token
    #[must_use]
    pub fn invalidated(&self) -> Self {
        Self {
            token: self.token.clone(),
            authenticated: false,
        }
    }

    /// Gets the current token
    #[inline]
    pub fn token(&self) -> &AuthenticationToken {
        &self.token
    }

    /// Whether the token is currently considered authorized
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }
}
