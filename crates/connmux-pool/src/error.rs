//! Error taxonomy for session establishment and credential refresh

use std::time::Duration;

use connmux_core::ConnectionKey;
use thiserror::Error;

/// Why a refresh-token exchange did not produce new credentials.
///
/// None of these are retried by the refresher itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("no token endpoint configured")]
    MissingTokenEndpoint,

    #[error("no client id configured")]
    MissingClientId,

    #[error("invalid token endpoint {endpoint:?}: {reason}")]
    InvalidTokenEndpoint { endpoint: String, reason: String },

    /// Non-2xx response from the token endpoint
    #[error("token endpoint returned HTTP {status}: {reason}")]
    Endpoint { status: u16, reason: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("token request failed: {0}")]
    Network(String),
}

/// Error returned by [`SessionPool::acquire`](crate::SessionPool::acquire).
///
/// Cloneable so one single-flight outcome reaches every joiner unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("connect to {key} timed out after {timeout:?}")]
    ConnectTimeout { key: ConnectionKey, timeout: Duration },

    /// Credentials were rejected and refreshing them did not help
    #[error("authentication for {key} rejected: {reason}")]
    AuthExpired { key: ConnectionKey, reason: String },

    #[error("credential refresh for {key} failed: {reason}")]
    RefreshFailed {
        key: ConnectionKey,
        reason: RefreshFailure,
    },

    #[error("transport error for {key}: {message}")]
    TransportError { key: ConnectionKey, message: String },

    /// Every slot is held by an in-flight establishment
    #[error("pool capacity {capacity} exhausted by in-flight establishments")]
    CapacityContention { capacity: usize },

    #[error("credential store error for {key}: {message}")]
    CredentialStore { key: ConnectionKey, message: String },

    /// Establishment cancelled by invalidation or shutdown
    #[error("establishment for {key} was cancelled")]
    Cancelled { key: ConnectionKey },

    #[error("session pool is shut down")]
    ShutDown,
}

impl PoolError {
    /// Whether a later `acquire` for the same key could plausibly succeed
    /// without anyone changing configuration or credentials.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PoolError::ConnectTimeout { .. }
                | PoolError::TransportError { .. }
                | PoolError::CapacityContention { .. }
                | PoolError::Cancelled { .. }
        )
    }

    /// Whether the failure is an authentication problem the user must fix
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            PoolError::AuthExpired { .. } | PoolError::RefreshFailed { .. }
        )
    }
}
