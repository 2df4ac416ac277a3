//! Connection key - identity of a logical downstream connection

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a downstream connection.
///
/// Stable for the lifetime of the connection and used verbatim as the
/// session cache key and the credential store key.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionKey(String);

impl ConnectionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ConnectionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for ConnectionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ConnectionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}
