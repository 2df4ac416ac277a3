//! Domain entities, value objects, and events
//!
//! - Value Objects (ConnectionKey, Credential, RefreshOutcome)
//! - Pool Events (PoolEvent enum for observers)
//! - Configuration (PoolConfig)

pub mod config;
mod credential;
mod event;
mod key;

pub use config::{ConfigError, PoolConfig};
pub use credential::{Credential, RefreshOutcome};
pub use event::{EvictionReason, PoolEvent};
pub use key::ConnectionKey;
