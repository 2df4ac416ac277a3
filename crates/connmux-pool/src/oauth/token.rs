//! Token endpoint wire types

use serde::Deserialize;

/// 2xx body of a refresh-token grant.
///
/// `access_token` is optional here so a missing value is reported as a
/// malformed response instead of an opaque deserialization error.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

/// Error body of a failed token request (RFC 6749 section 5.2)
#[derive(Debug, Default, Deserialize)]
pub struct TokenErrorResponse {
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl TokenErrorResponse {
    /// Human-readable reason, if the body carried one
    pub fn message(&self) -> Option<String> {
        match (&self.error, &self.error_description) {
            (Some(error), Some(desc)) => Some(format!("{}: {}", error, desc)),
            (Some(error), None) => Some(error.clone()),
            (None, Some(desc)) => Some(desc.clone()),
            (None, None) => None,
        }
    }
}
