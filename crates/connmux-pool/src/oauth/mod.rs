//! OAuth credential refresh
//!
//! Implements the refresh-token grant used to recover from expired access
//! tokens on outbound connections.

mod refresh;
mod token;

pub use refresh::{CredentialRefresher, OAuthRefresher};
pub use token::{TokenErrorResponse, TokenResponse};
