use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The name of a registered integration, bot or user
///
/// Calls are authenticated on behalf of an identity.
#[braid(serde)]
pub struct IdentityName;

/// A short-lived session token issued by the platform's session authenticator
#[braid(serde, debug = "owned", display = "owned")]
pub struct SessionToken;

limited_reveal!(SessionTokenRef: "SESSION TOKEN", 12);

/// A secondary token issued by the key manager authenticator
#[braid(serde, debug = "owned", display = "owned")]
pub struct KeyManagerToken;

limited_reveal!(KeyManagerTokenRef: "KEY MANAGER TOKEN", 12);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_token_is_redacted_by_default() {
        let token = SessionToken::from_static("b8b37d5aa121fd5947b05b53a3b2e3d2");
        assert_eq!(format!("{}", token), "***SESSION TOKEN***");
        assert_eq!(format!("{:?}", token), "***SESSION TOKEN***");
    }

    #[test]
    fn alternate_debug_reveals_a_prefix() {
        let token = KeyManagerToken::from_static("0100abcdef0123456789");
        assert_eq!(format!("{:#?}", token), "\"0100abcdef0…\"");
    }

    #[test]
    fn alternate_display_reveals_everything() {
        let token = SessionToken::from_static("ae96960b");
        assert_eq!(format!("{:#}", token), "ae96960b");
    }
}
