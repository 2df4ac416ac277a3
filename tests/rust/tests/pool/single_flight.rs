//! Single-flight establishment tests
//!
//! Concurrent callers for one key must share a single establishment and
//! observe the same outcome, success or failure.

use connmux_pool::{PoolError, Session, TransportConnectResult};
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tests::events::{drain_events, type_names};
use tests::{ConnectionKey, PoolEvent, PoolHarness};

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_acquire_establishes_and_caches() {
    let mut harness = PoolHarness::with_keys(10, &["server-a"]);

    let first = harness.pool.acquire("server-a").await.unwrap();
    let second = harness.pool.acquire("server-a").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.key().as_str(), "server-a");
    assert_eq!(harness.factory.created_count("server-a"), 1);
    assert_eq!(harness.store.get_count(), 1);

    let events = drain_events(&mut harness.events);
    assert_eq!(type_names(&events), vec!["session_established"]);
    assert_eq!(
        events[0],
        PoolEvent::SessionEstablished {
            key: ConnectionKey::from("server-a"),
            session_id: first.id(),
            refreshed: false,
        }
    );
}

#[tokio::test]
async fn test_distinct_keys_get_distinct_sessions() {
    let harness = PoolHarness::with_keys(10, &["server-a", "server-b"]);

    let a = harness.pool.acquire("server-a").await.unwrap();
    let b = harness.pool.acquire("server-b").await.unwrap();

    assert_ne!(a.id(), b.id());
    assert_eq!(harness.factory.created_count("server-a"), 1);
    assert_eq!(harness.factory.created_count("server-b"), 1);
    assert_eq!(harness.pool.len(), 2);
}

#[tokio::test]
async fn test_session_uses_stored_credential() {
    let harness = PoolHarness::with_keys(10, &["server-a"]);

    harness.pool.acquire("server-a").await.unwrap();

    assert_eq!(
        harness.factory.presented_tokens("server-a"),
        vec!["server-a-token".to_string()]
    );
}

// ============================================================================
// Concurrent Acquisition
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquires_share_one_establishment() {
    let harness = PoolHarness::with_keys(10, &["server-a"]);
    harness.factory.set_connect_delay(Duration::from_millis(200));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = harness.pool.clone();
            tokio::spawn(async move { pool.acquire("server-a").await })
        })
        .collect();

    let sessions: Vec<Arc<Session>> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    assert_eq!(harness.factory.created_count("server-a"), 1);
    assert_eq!(harness.store.get_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquires_share_failure() {
    let harness = PoolHarness::with_keys(10, &["server-a"]);
    harness.factory.set_connect_delay(Duration::from_millis(200));
    harness.factory.script(
        "server-a",
        [TransportConnectResult::Failed("connection refused".to_string())],
    );

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let pool = harness.pool.clone();
            tokio::spawn(async move { pool.acquire("server-a").await })
        })
        .collect();

    let expected = PoolError::TransportError {
        key: ConnectionKey::from("server-a"),
        message: "connection refused".to_string(),
    };
    for joined in join_all(handles).await {
        assert_eq!(joined.unwrap().unwrap_err(), expected);
    }
    assert_eq!(harness.factory.created_count("server-a"), 1);
    assert!(!harness.pool.contains("server-a"));
}

#[tokio::test]
async fn test_failure_is_not_cached() {
    let mut harness = PoolHarness::with_keys(10, &["server-a"]);
    harness.factory.script(
        "server-a",
        [TransportConnectResult::Failed("connection refused".to_string())],
    );

    let err = harness.pool.acquire("server-a").await.unwrap_err();
    assert!(err.is_transient());
    assert!(harness.pool.is_empty());

    // Script exhausted: next attempt connects
    let session = harness.pool.acquire("server-a").await.unwrap();
    assert!(!session.is_closed());
    assert_eq!(harness.factory.created_count("server-a"), 2);

    let events = drain_events(&mut harness.events);
    assert_eq!(
        type_names(&events),
        vec!["establish_failed", "session_established"]
    );
}

#[tokio::test]
async fn test_failed_transport_is_closed() {
    let harness = PoolHarness::with_keys(10, &["server-a"]);
    harness.factory.script(
        "server-a",
        [TransportConnectResult::Failed("tls handshake".to_string())],
    );

    harness.pool.acquire("server-a").await.unwrap_err();

    let transports = harness.factory.transports("server-a");
    assert_eq!(transports.len(), 1);
    assert_eq!(transports[0].close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let harness = PoolHarness::with_keys(10, &["server-a"]);
    harness.factory.set_connect_delay(Duration::from_secs(60));

    let err = harness.pool.acquire("server-a").await.unwrap_err();

    assert_eq!(
        err,
        PoolError::ConnectTimeout {
            key: ConnectionKey::from("server-a"),
            timeout: Duration::from_secs(5),
        }
    );
    assert!(!harness.pool.contains("server-a"));
    assert_eq!(harness.factory.transports("server-a")[0].close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_entry_visible_while_establishing() {
    let harness = PoolHarness::with_keys(10, &["server-a"]);
    harness.factory.set_connect_delay(Duration::from_secs(1));

    let pool = harness.pool.clone();
    let handle = tokio::spawn(async move { pool.acquire("server-a").await });

    harness.settle(|pool| pool.stats().pending == 1).await;
    assert!(harness.pool.contains("server-a"));
    assert_eq!(harness.pool.stats().ready, 0);

    handle.await.unwrap().unwrap();
    let stats = harness.pool.stats();
    assert_eq!((stats.ready, stats.pending), (1, 0));
}
