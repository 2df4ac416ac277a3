//! Pool establishment refreshing against a mock token endpoint

use connmux_pool::{OAuthRefresher, PoolError, RefreshFailure, SessionPool, TransportConnectResult};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tests::fixtures::test_config;
use tests::{Credential, InMemoryCredentialStore, MockTransportFactory};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_pool_refreshes_through_token_endpoint() {
    tests::init_test_logging();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("refresh_token=r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "a2",
            "token_type": "Bearer",
            "refresh_token": "r2",
            "expires_in": 600
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = Arc::new(InMemoryCredentialStore::new().with_credential(
        "server-a",
        Credential::oauth(
            "a1",
            "r1",
            format!("{}/oauth/token", mock_server.uri()),
            "client_123",
        ),
    ));
    let factory = Arc::new(MockTransportFactory::new());
    factory.script(
        "server-a",
        [TransportConnectResult::AuthRequired {
            reason: "401".to_string(),
        }],
    );

    let pool = SessionPool::with_refresher(
        &test_config(4),
        factory.clone(),
        store.clone(),
        Arc::new(OAuthRefresher::with_client(reqwest::Client::new())),
    )
    .unwrap();

    let session = pool.acquire("server-a").await.unwrap();

    assert!(!session.is_closed());
    assert_eq!(
        factory.presented_tokens("server-a"),
        vec!["a1".to_string(), "a2".to_string()]
    );
    let stored = store.credential("server-a").unwrap();
    assert_eq!(stored.access_token, "a2");
    assert_eq!(stored.refresh_token.as_deref(), Some("r2"));
}

#[tokio::test]
async fn test_pool_new_builds_http_refresher() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let factory = Arc::new(MockTransportFactory::new());

    let pool = SessionPool::new(&test_config(4), factory, store).unwrap();

    assert_eq!(pool.stats().capacity, 4);
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_pool_new_rejects_invalid_config() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let factory = Arc::new(MockTransportFactory::new());

    let result = SessionPool::new(&test_config(0), factory, store);

    assert!(result.is_err());
}

#[tokio::test]
async fn test_with_refresher_rejects_invalid_config() {
    let store = Arc::new(InMemoryCredentialStore::new());
    let factory = Arc::new(MockTransportFactory::new());
    let config = test_config(4).with_connect_timeout(Duration::ZERO);

    let result = SessionPool::with_refresher(
        &config,
        factory,
        store,
        Arc::new(OAuthRefresher::with_client(reqwest::Client::new())),
    );

    assert!(result.is_err());
}

#[tokio::test]
async fn test_sub_second_connect_timeout_is_honored() {
    let store = Arc::new(
        InMemoryCredentialStore::new().with_credential("server-a", Credential::bearer("a1")),
    );
    let factory = Arc::new(MockTransportFactory::new());
    factory.set_connect_delay(Duration::from_millis(50));
    let config = test_config(4).with_connect_timeout(Duration::from_millis(500));

    let pool = SessionPool::with_refresher(
        &config,
        factory,
        store,
        Arc::new(OAuthRefresher::with_client(reqwest::Client::new())),
    )
    .unwrap();

    assert!(pool.acquire("server-a").await.is_ok());
}

#[tokio::test]
async fn test_rejected_bearer_without_refresh_token() {
    let store = Arc::new(
        InMemoryCredentialStore::new().with_credential("server-a", Credential::bearer("a1")),
    );
    let factory = Arc::new(MockTransportFactory::new());
    factory.script(
        "server-a",
        [TransportConnectResult::AuthRequired {
            reason: "401".to_string(),
        }],
    );

    let pool = SessionPool::with_refresher(
        &test_config(4),
        factory.clone(),
        store.clone(),
        Arc::new(OAuthRefresher::with_client(reqwest::Client::new())),
    )
    .unwrap();

    let err = pool.acquire("server-a").await.unwrap_err();

    assert_eq!(
        err,
        PoolError::RefreshFailed {
            key: "server-a".into(),
            reason: RefreshFailure::MissingRefreshToken,
        }
    );
    assert!(!pool.contains("server-a"));
    assert_eq!(factory.created_count("server-a"), 1);
    assert_eq!(store.put_count(), 0);
}
