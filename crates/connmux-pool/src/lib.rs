//! ConnMux Pool - outbound session lifecycle
//!
//! Maintains at most one live session per [`ConnectionKey`], shares a single
//! establishment between concurrent callers, and recovers from expired
//! credentials at connect time with one refresh and one reconnect.
//!
//! ```text
//!   SessionPool ──► SessionEstablisher ──► TransportFactory ──► Transport
//!                          │
//!                          ├──► CredentialStore (get / put)
//!                          └──► CredentialRefresher (OAuth refresh grant)
//! ```

pub mod error;
pub mod establisher;
pub mod logging;
pub mod oauth;
mod pool;
pub mod session;
pub mod transport;

pub use error::{PoolError, RefreshFailure};
pub use establisher::{Established, SessionEstablisher, DEFAULT_CONNECT_TIMEOUT};
pub use oauth::{CredentialRefresher, OAuthRefresher};
pub use pool::{PoolStats, SessionPool};
pub use session::Session;
pub use transport::{CloseHook, Transport, TransportConnectResult, TransportFactory};

pub use connmux_core;
pub use connmux_core::{ConnectionKey, Credential, CredentialStore, PoolConfig, PoolEvent};
