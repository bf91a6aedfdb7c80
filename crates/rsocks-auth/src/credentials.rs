//! Credential derivation from the shared secret

use sha1::{Digest, Sha1};
use std::fmt;

/// Derive the SOCKS5 username for a shared secret
///
/// Returns the lowercase hex SHA-1 digest of the secret's UTF-8 bytes
/// (always 40 characters). Both ends compute it independently.
///
/// # Example
/// ```
/// use rsocks_auth::derive_identifier;
///
/// let id = derive_identifier("abc");
/// assert_eq!(id, "a9993e364706816aba3e25717850c26c9cd0d89d");
/// ```
pub fn derive_identifier(secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Username/password pair presented to (and checked by) the SOCKS5 engine
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedCredentials {
    /// Hex digest of the secret, used as the SOCKS5 username
    pub identifier: String,
    /// The shared secret, used as the SOCKS5 password
    pub secret: String,
}

impl DerivedCredentials {
    pub fn from_secret(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        Self {
            identifier: derive_identifier(&secret),
            secret,
        }
    }
}

impl fmt::Debug for DerivedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedCredentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(
            derive_identifier(""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            derive_identifier("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_identifier_is_deterministic_hex() {
        let first = derive_identifier("hunter2");
        let second = derive_identifier("hunter2");

        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_different_secrets_differ() {
        assert_ne!(derive_identifier("hunter2"), derive_identifier("hunter3"));
    }

    #[test]
    fn test_from_secret() {
        let creds = DerivedCredentials::from_secret("hunter2");
        assert_eq!(creds.secret, "hunter2");
        assert_eq!(creds.identifier, derive_identifier("hunter2"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = DerivedCredentials::from_secret("hunter2");
        let rendered = format!("{:?}", creds);

        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains(&creds.identifier));
    }
}
