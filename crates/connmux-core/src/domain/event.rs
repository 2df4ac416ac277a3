//! Pool Events - observable lifecycle of pooled sessions
//!
//! Events are emitted by the session pool on a broadcast channel and consumed
//! by whoever subscribes (status UI, audit logging, metrics). Emission never
//! blocks and events are dropped when there are no subscribers.

use serde::{Deserialize, Serialize};

use super::ConnectionKey;

/// Why a live session left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Least recently used entry displaced by a new key
    Capacity,
    /// Caller invalidated the key
    Invalidated,
    /// Pool is shutting down
    Shutdown,
}

/// Session pool event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolEvent {
    /// A new session was connected and cached
    SessionEstablished {
        key: ConnectionKey,
        session_id: u64,
        /// Whether a credential refresh was needed to connect
        refreshed: bool,
    },

    /// An establishment attempt failed; nothing was cached
    EstablishFailed { key: ConnectionKey, error: String },

    /// Refreshed credentials were persisted for a key
    CredentialRefreshed { key: ConnectionKey },

    /// The pool removed and closed a live session
    SessionEvicted {
        key: ConnectionKey,
        session_id: u64,
        reason: EvictionReason,
    },

    /// The transport closed on its own; the session unregistered itself
    SessionClosed { key: ConnectionKey, session_id: u64 },
}

impl PoolEvent {
    /// Key the event refers to
    pub fn key(&self) -> &ConnectionKey {
        match self {
            PoolEvent::SessionEstablished { key, .. }
            | PoolEvent::EstablishFailed { key, .. }
            | PoolEvent::CredentialRefreshed { key }
            | PoolEvent::SessionEvicted { key, .. }
            | PoolEvent::SessionClosed { key, .. } => key,
        }
    }

    /// Event type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            PoolEvent::SessionEstablished { .. } => "session_established",
            PoolEvent::EstablishFailed { .. } => "establish_failed",
            PoolEvent::CredentialRefreshed { .. } => "credential_refreshed",
            PoolEvent::SessionEvicted { .. } => "session_evicted",
            PoolEvent::SessionClosed { .. } => "session_closed",
        }
    }
}
