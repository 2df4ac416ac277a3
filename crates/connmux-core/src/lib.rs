//! # ConnMux Core Library
//!
//! Domain types and collaborator contracts for the outbound connection pool.
//!
//! ## Modules
//!
//! - `domain` - Value types (ConnectionKey, Credential, RefreshOutcome),
//!   pool events and pool configuration
//! - `repository` - Data access traits implemented by the embedding product

pub mod domain;
pub mod repository;

// Re-export commonly used types
pub use domain::*;
pub use repository::*;
