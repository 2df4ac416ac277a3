//! Transport abstraction for outbound connections
//!
//! The embedding product supplies a [`TransportFactory`]; the pool never
//! knows which wire protocol a transport speaks. New transports are added by
//! implementing the traits, without touching the pool.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use connmux_core::{ConnectionKey, Credential};

/// Callback a transport invokes when it closes out-of-band (remote
/// disconnect, process exit). May be called more than once.
pub type CloseHook = Box<dyn Fn() + Send + Sync>;

/// Result of a transport connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConnectResult {
    /// Successfully connected
    Connected,
    /// The remote rejected the presented credentials
    AuthRequired { reason: String },
    /// Connection failed for any other reason (DNS, TLS, handshake)
    Failed(String),
}

/// Transport trait for outbound connections
///
/// A transport is created disconnected, connected at most once, and closed
/// exactly when its session leaves the pool. A transport dropped before
/// `connect` completes (cancelled establishment) must release whatever it
/// had acquired.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempt to connect. The pool also enforces `timeout` from outside,
    /// so implementations may treat it as advisory.
    async fn connect(&self, timeout: Duration) -> TransportConnectResult;

    /// Register the hook to call when the transport closes on its own
    fn on_close(&self, hook: CloseHook);

    /// Close the transport. Must be idempotent and must not fail.
    async fn close(&self);

    /// Get a description for logging
    fn description(&self) -> String;
}

/// Factory for creating transport instances
pub trait TransportFactory: Send + Sync {
    /// Create a not-yet-connected transport for `key` using `credential`
    fn create(&self, key: &ConnectionKey, credential: &Credential) -> Arc<dyn Transport>;
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("description", &self.description())
            .finish()
    }
}
