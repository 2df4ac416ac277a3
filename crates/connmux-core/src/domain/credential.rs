//! Credential entity - OAuth tokens and client registration for one connection
//!
//! The credential store is the single source of truth; the pool only reads a
//! credential before connecting and overwrites it after a successful refresh.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// OAuth credential for a specific connection.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Bearer token presented to the remote server
    pub access_token: String,

    /// Long-lived token used to obtain a new access token
    pub refresh_token: Option<String>,

    /// OAuth token endpoint URL
    pub token_endpoint: Option<String>,

    /// OAuth client ID
    pub client_id: Option<String>,

    /// OAuth client secret (confidential clients only)
    pub client_secret: Option<String>,

    /// Space-delimited scope string
    #[serde(default)]
    pub scope: Option<String>,

    /// Access token expiry, when the server reported one
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// When the credential was last written
    pub updated_at: DateTime<Utc>,
}

/// Successful result of a refresh-token exchange.
///
/// `refresh_token` has already fallen back to the prior refresh token when the
/// server did not rotate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

impl Credential {
    /// Create a credential holding only an access token
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_endpoint: None,
            client_id: None,
            client_secret: None,
            scope: None,
            expires_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Create a refreshable OAuth credential
    pub fn oauth(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            refresh_token: Some(refresh_token.into()),
            token_endpoint: Some(token_endpoint.into()),
            client_id: Some(client_id.into()),
            ..Self::bearer(access_token)
        }
    }

    pub fn with_client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the access token is expired (no expiry = never expires)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    /// Check if the access token expires within `buffer_seconds`
    pub fn expires_soon(&self, buffer_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() + Duration::seconds(buffer_seconds) >= expires_at,
            None => false,
        }
    }

    /// Check if a refresh-token grant has everything it needs
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.token_endpoint.is_some() && self.client_id.is_some()
    }

    /// Build the credential that replaces this one after a successful refresh.
    ///
    /// Client registration fields are carried over. Scope keeps its prior value
    /// when the server did not echo one back.
    pub fn apply_refresh(&self, outcome: &RefreshOutcome) -> Credential {
        let now = Utc::now();
        Credential {
            access_token: outcome.access_token.clone(),
            refresh_token: outcome
                .refresh_token
                .clone()
                .or_else(|| self.refresh_token.clone()),
            token_endpoint: self.token_endpoint.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            scope: outcome.scope.clone().or_else(|| self.scope.clone()),
            expires_at: outcome.expires_in.and_then(|secs| {
                let secs = i64::try_from(secs).ok()?;
                now.checked_add_signed(Duration::try_seconds(secs)?)
            }),
            updated_at: now,
        }
    }

    /// Get scopes as a vector
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_ref()
            .map(|s| s.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
