//! Session Establisher - connect, recover from expired credentials, reconnect
//!
//! SessionEstablisher is responsible for:
//! - Creating a transport from the current credential via the TransportFactory
//! - Bounding each connect attempt with a timeout
//! - On an authentication failure: one refresh, one persist, one reconnect
//! - Wiring the transport's close notification back to the pool
//!
//! Retry budget per establishment is exactly 1 refresh + 1 reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use connmux_core::{ConnectionKey, Credential, CredentialStore, PoolEvent};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::oauth::CredentialRefresher;
use crate::session::Session;
use crate::transport::{CloseHook, Transport, TransportConnectResult, TransportFactory};

/// Default connection timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A freshly connected session
#[derive(Debug)]
pub struct Established {
    pub session: Session,
    /// Whether credentials had to be refreshed to connect
    pub refreshed: bool,
}

/// Outcome of one connect attempt that is not terminal
enum ConnectAttempt {
    Connected(Arc<dyn Transport>),
    AuthRejected(String),
}

/// Session Establisher handles connect-time authentication recovery
pub struct SessionEstablisher {
    transport_factory: Arc<dyn TransportFactory>,
    credential_store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn CredentialRefresher>,
    connect_timeout: Duration,
    event_tx: Option<broadcast::Sender<PoolEvent>>,
}

impl SessionEstablisher {
    pub fn new(
        transport_factory: Arc<dyn TransportFactory>,
        credential_store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn CredentialRefresher>,
    ) -> Self {
        Self {
            transport_factory,
            credential_store,
            refresher,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            event_tx: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_event_tx(mut self, event_tx: broadcast::Sender<PoolEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Establish a session for `key`.
    ///
    /// `on_close` is registered with the transport once connected and is
    /// invoked whenever the transport closes on its own.
    pub async fn establish(
        &self,
        key: &ConnectionKey,
        session_id: u64,
        on_close: CloseHook,
    ) -> Result<Established, PoolError> {
        let credential = self.load_credential(key).await?;

        let (transport, refreshed) = match self.try_connect(key, &credential).await? {
            ConnectAttempt::Connected(transport) => (transport, false),
            ConnectAttempt::AuthRejected(reason) => {
                info!(
                    key = %key,
                    reason = %reason,
                    "[SessionEstablisher] Credentials rejected, refreshing"
                );
                self.refresh_and_persist(key, &credential).await?;

                // Read back through the store so the retry uses what was persisted
                let refreshed = self.load_credential(key).await?;
                match self.try_connect(key, &refreshed).await? {
                    ConnectAttempt::Connected(transport) => (transport, true),
                    ConnectAttempt::AuthRejected(reason) => {
                        warn!(
                            key = %key,
                            reason = %reason,
                            "[SessionEstablisher] Refreshed credentials rejected"
                        );
                        return Err(PoolError::AuthExpired {
                            key: key.clone(),
                            reason,
                        });
                    }
                }
            }
        };

        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        transport.on_close(Box::new(move || {
            flag.store(true, Ordering::Release);
            on_close();
        }));

        info!(
            key = %key,
            session_id,
            refreshed,
            transport = %transport.description(),
            "[SessionEstablisher] Connected"
        );

        Ok(Established {
            session: Session::new(key.clone(), session_id, transport, closed),
            refreshed,
        })
    }

    async fn load_credential(&self, key: &ConnectionKey) -> Result<Credential, PoolError> {
        match self.credential_store.get(key).await {
            Ok(Some(credential)) => Ok(credential),
            Ok(None) => Err(PoolError::CredentialStore {
                key: key.clone(),
                message: "no credential stored".to_string(),
            }),
            Err(e) => Err(PoolError::CredentialStore {
                key: key.clone(),
                message: format!("failed to load credential: {:#}", e),
            }),
        }
    }

    /// One bounded connect attempt. Failed transports are closed before
    /// returning so nothing leaks.
    async fn try_connect(
        &self,
        key: &ConnectionKey,
        credential: &Credential,
    ) -> Result<ConnectAttempt, PoolError> {
        let transport = self.transport_factory.create(key, credential);
        debug!(
            key = %key,
            transport = %transport.description(),
            timeout = ?self.connect_timeout,
            "[SessionEstablisher] Connecting"
        );

        let result =
            tokio::time::timeout(self.connect_timeout, transport.connect(self.connect_timeout))
                .await;

        match result {
            Ok(TransportConnectResult::Connected) => Ok(ConnectAttempt::Connected(transport)),
            Ok(TransportConnectResult::AuthRequired { reason }) => {
                transport.close().await;
                Ok(ConnectAttempt::AuthRejected(reason))
            }
            Ok(TransportConnectResult::Failed(message)) => {
                transport.close().await;
                warn!(key = %key, error = %message, "[SessionEstablisher] Connect failed");
                Err(PoolError::TransportError {
                    key: key.clone(),
                    message,
                })
            }
            Err(_) => {
                transport.close().await;
                warn!(
                    key = %key,
                    timeout = ?self.connect_timeout,
                    "[SessionEstablisher] Connect timed out"
                );
                Err(PoolError::ConnectTimeout {
                    key: key.clone(),
                    timeout: self.connect_timeout,
                })
            }
        }
    }

    /// Refresh once and persist the result; the write completes before
    /// this returns.
    async fn refresh_and_persist(
        &self,
        key: &ConnectionKey,
        credential: &Credential,
    ) -> Result<(), PoolError> {
        let outcome = self.refresher.refresh(credential).await.map_err(|reason| {
            warn!(key = %key, reason = %reason, "[SessionEstablisher] Refresh failed");
            PoolError::RefreshFailed {
                key: key.clone(),
                reason,
            }
        })?;

        let updated = credential.apply_refresh(&outcome);
        self.credential_store
            .put(key, &updated)
            .await
            .map_err(|e| PoolError::CredentialStore {
                key: key.clone(),
                message: format!("failed to persist refreshed credential: {:#}", e),
            })?;

        debug!(key = %key, "[SessionEstablisher] Persisted refreshed credential");
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(PoolEvent::CredentialRefreshed { key: key.clone() });
        }
        Ok(())
    }
}
