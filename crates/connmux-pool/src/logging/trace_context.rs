//! Trace Context - establishment correlation and subscriber setup

use std::sync::atomic::{AtomicU32, Ordering};

use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static POOL_TAGS: AtomicU32 = AtomicU32::new(1);

/// Workspace crates logged at debug when RUST_LOG is unset
const CRATE_DIRECTIVES: &[&str] = &["connmux_core=debug", "connmux_pool=debug"];

/// Process-unique tag for a pool instance
pub fn next_pool_tag() -> u32 {
    POOL_TAGS.fetch_add(1, Ordering::Relaxed)
}

/// Correlation id for one establishment, `<pool tag>.<session id>` in hex.
///
/// Session ids are unique within a pool, so the pair is unique within the
/// process and can be matched against `session_id` fields in later logs.
pub fn attempt_id(pool_tag: u32, session_id: u64) -> String {
    format!("{:x}.{:x}", pool_tag, session_id)
}

/// Install a console subscriber.
///
/// RUST_LOG takes precedence; otherwise `default_level` applies with debug
/// for our crates. Returns false when a global subscriber already exists.
pub fn init_tracing(default_level: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        CRATE_DIRECTIVES
            .iter()
            .filter_map(|d| d.parse::<Directive>().ok())
            .fold(EnvFilter::new(default_level), |filter, directive| {
                filter.add_directive(directive)
            })
    });

    let console_layer = fmt::layer()
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .is_ok()
}
