use crate::credentials::DerivedCredentials;
use std::collections::HashMap;

/// Checks username/password pairs offered during SOCKS5 sub-negotiation
pub trait CredentialStore: Send + Sync {
    fn valid(&self, username: &str, password: &str) -> bool;
}

/// In-memory username → password table
#[derive(Default)]
pub struct StaticCredentials {
    entries: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry, returning the previous password if any
    pub fn insert(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Option<String> {
        self.entries.insert(username.into(), password.into())
    }

    pub fn with(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.insert(username, password);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CredentialStore for StaticCredentials {
    fn valid(&self, username: &str, password: &str) -> bool {
        self.entries
            .get(username)
            .is_some_and(|expected| expected == password)
    }
}

impl From<DerivedCredentials> for StaticCredentials {
    fn from(creds: DerivedCredentials) -> Self {
        Self::new().with(creds.identifier, creds.secret)
    }
}
