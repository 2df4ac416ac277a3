//! Centralized Logging Infrastructure
//!
//! Provides structured logging with:
//! - Attempt IDs for correlating one establishment across components
//! - Compact console output with env-based filtering

mod trace_context;

pub use trace_context::{attempt_id, init_tracing, next_pool_tag};
