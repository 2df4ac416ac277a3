//! Refresh-and-reconnect tests

use connmux_pool::TransportConnectResult;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tests::events::{drain_events, type_names};
use tests::fixtures::{oauth_credential, test_config};
use tests::{ConnectionKey, InMemoryCredentialStore, PoolEvent, PoolHarness, ScriptedRefresher};

fn auth_required() -> TransportConnectResult {
    TransportConnectResult::AuthRequired {
        reason: "401 invalid_token".to_string(),
    }
}

fn harness_with(refresher: ScriptedRefresher) -> PoolHarness {
    let store =
        InMemoryCredentialStore::new().with_credential("server-a", oauth_credential("stale"));
    PoolHarness::with_refresher(test_config(10), store, refresher)
}

#[tokio::test]
async fn test_auth_rejection_refreshes_and_reconnects() {
    let mut harness = harness_with(ScriptedRefresher::succeeding("fresh"));
    harness.factory.script("server-a", [auth_required()]);

    let session = harness.pool.acquire("server-a").await.unwrap();

    assert!(!session.is_closed());
    assert_eq!(
        harness.factory.presented_tokens("server-a"),
        vec!["stale".to_string(), "fresh".to_string()]
    );
    assert_eq!(harness.refresher.call_count(), 1);
    assert_eq!(harness.store.put_count(), 1);

    // First transport was rejected and closed
    assert_eq!(harness.factory.transports("server-a")[0].close_calls(), 1);

    let events = drain_events(&mut harness.events);
    assert_eq!(
        type_names(&events),
        vec!["credential_refreshed", "session_established"]
    );
    assert_eq!(
        events[1],
        PoolEvent::SessionEstablished {
            key: ConnectionKey::from("server-a"),
            session_id: session.id(),
            refreshed: true,
        }
    );
}

#[tokio::test]
async fn test_refreshed_credential_is_persisted() {
    let harness = harness_with(ScriptedRefresher::succeeding("fresh"));
    harness.factory.script("server-a", [auth_required()]);

    harness.pool.acquire("server-a").await.unwrap();

    let stored = harness.store.credential("server-a").unwrap();
    assert_eq!(stored.access_token, "fresh");
    assert_eq!(stored.refresh_token.as_deref(), Some("fresh-refresh"));
    assert_eq!(stored.client_id.as_deref(), Some("test-client"));
    assert!(stored.expires_at.is_some());
    assert!(!stored.is_expired());

    // Refresher saw the credential that was rejected
    assert_eq!(harness.refresher.seen()[0].access_token, "stale");
}

#[tokio::test]
async fn test_retry_reads_credential_back_from_store() {
    let harness = harness_with(ScriptedRefresher::succeeding("fresh"));
    harness.factory.script("server-a", [auth_required()]);

    harness.pool.acquire("server-a").await.unwrap();

    // Initial load plus the read-back before reconnecting
    assert_eq!(harness.store.get_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_trigger_one_refresh() {
    let refresher = ScriptedRefresher::succeeding("fresh");
    refresher.set_delay(Duration::from_millis(500));
    let harness = harness_with(refresher);
    harness.factory.script("server-a", [auth_required()]);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let pool = harness.pool.clone();
            tokio::spawn(async move { pool.acquire("server-a").await })
        })
        .collect();

    let ids: Vec<u64> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().id())
        .collect();

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(harness.refresher.call_count(), 1);
    assert_eq!(harness.store.put_count(), 1);
    assert_eq!(harness.factory.created_count("server-a"), 2);
}

#[tokio::test]
async fn test_no_refresh_when_first_connect_succeeds() {
    let harness = harness_with(ScriptedRefresher::succeeding("fresh"));

    harness.pool.acquire("server-a").await.unwrap();

    assert_eq!(harness.refresher.call_count(), 0);
    assert_eq!(harness.store.put_count(), 0);
}
