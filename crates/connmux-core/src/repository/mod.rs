//! Repository traits for data access
//!
//! These traits define the interface for credential storage without
//! specifying the implementation (SQLite, keychain, in-memory, etc.)

use async_trait::async_trait;

use crate::domain::{ConnectionKey, Credential};

/// Result type for repository operations
pub type RepoResult<T> = anyhow::Result<T>;

/// Credential store trait
///
/// Implementations must give read-after-write consistency per key: a `get`
/// issued after a completed `put` for the same key returns the written value.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Get the credential for a connection
    async fn get(&self, key: &ConnectionKey) -> RepoResult<Option<Credential>>;

    /// Replace the credential for a connection
    async fn put(&self, key: &ConnectionKey, credential: &Credential) -> RepoResult<()>;
}
