//! Session Pool - bounded, single-flight cache of live sessions
//!
//! Keyed by [`ConnectionKey`]. Each entry is either a pending establishment
//! (callers await it) or a ready session (callers use it directly). Entries
//! are evicted least-recently-used first; pending entries are never evicted.
//!
//! ```text
//!   acquire(k) ──► hit (Ready)    ──► promote, return session
//!             ├──► join (Pending) ──► await the shared outcome
//!             └──► miss           ──► make room, insert Pending, spawn establish
//!                                        │
//!                       success ◄────────┴────────► failure
//!                  Pending -> Ready                 entry removed
//! ```

mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use connmux_core::{ConnectionKey, CredentialStore, EvictionReason, PoolConfig, PoolEvent};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::error::PoolError;
use crate::establisher::{Established, SessionEstablisher};
use crate::logging::{attempt_id, next_pool_tag};
use crate::oauth::{CredentialRefresher, OAuthRefresher};
use crate::session::Session;
use crate::transport::{CloseHook, TransportFactory};
use state::{CacheState, EstablishResult, Pending, Slot};

/// Pool occupancy snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub ready: usize,
    pub pending: usize,
}

/// Session pool handle. Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    state: Mutex<CacheState>,
    establisher: SessionEstablisher,
    next_session_id: AtomicU64,
    /// Distinguishes this pool's attempt ids from other pools in the process
    tag: u32,
    /// Parent of every pending establishment's cancellation token
    shutdown: CancellationToken,
    event_tx: broadcast::Sender<PoolEvent>,
}

/// What `acquire` decided under the lock
enum Lookup {
    Hit(Arc<Session>),
    Join(watch::Receiver<Option<EstablishResult>>),
    Start {
        outcome: watch::Receiver<Option<EstablishResult>>,
        flight: Flight,
        evicted: Vec<Arc<Session>>,
    },
}

/// Everything the establishment task needs
struct Flight {
    id: u64,
    tx: watch::Sender<Option<EstablishResult>>,
    cancel: CancellationToken,
}

impl SessionPool {
    /// Create a pool that refreshes credentials over HTTP
    pub fn new(
        config: &PoolConfig,
        transport_factory: Arc<dyn TransportFactory>,
        credential_store: Arc<dyn CredentialStore>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let refresher = OAuthRefresher::new(config.refresh_timeout())?;
        Self::with_refresher(config, transport_factory, credential_store, Arc::new(refresher))
    }

    /// Create a pool with a caller-supplied refresher
    pub fn with_refresher(
        config: &PoolConfig,
        transport_factory: Arc<dyn TransportFactory>,
        credential_store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn CredentialRefresher>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let establisher = SessionEstablisher::new(transport_factory, credential_store, refresher)
            .with_timeout(config.connect_timeout())
            .with_event_tx(event_tx.clone());

        info!(
            capacity = config.capacity,
            connect_timeout = ?config.connect_timeout(),
            "[SessionPool] Initialized"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(CacheState::new(config.capacity)),
                establisher,
                next_session_id: AtomicU64::new(1),
                tag: next_pool_tag(),
                shutdown: CancellationToken::new(),
                event_tx,
            }),
        })
    }

    /// Subscribe to pool events
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Get a live session for `key`, establishing one if needed.
    ///
    /// Concurrent callers for the same key share one establishment and
    /// receive the same session or the same error.
    pub async fn acquire(&self, key: impl Into<ConnectionKey>) -> Result<Arc<Session>, PoolError> {
        let key = key.into();

        let lookup = self.lookup(&key)?;
        let outcome = match lookup {
            Lookup::Hit(session) => return Ok(session),
            Lookup::Join(outcome) => {
                debug!(key = %key, "[SessionPool] Joining in-flight establishment");
                outcome
            }
            Lookup::Start {
                outcome,
                flight,
                evicted,
            } => {
                self.spawn_establish(key.clone(), flight);
                if !evicted.is_empty() {
                    // Dropping the handle does not stop the closes
                    let _ = self.inner.retire_all(evicted, EvictionReason::Capacity).await;
                }
                outcome
            }
        };

        wait_for_outcome(&key, outcome).await
    }

    /// Decide hit, join or start atomically
    fn lookup(&self, key: &ConnectionKey) -> Result<Lookup, PoolError> {
        let mut state = self.inner.state.lock();
        if self.inner.shutdown.is_cancelled() {
            return Err(PoolError::ShutDown);
        }

        match state.get(key.as_str()) {
            Some(Slot::Ready(session)) if !session.is_closed() => {
                let session = Arc::clone(session);
                state.touch(key.as_str());
                trace!(key = %key, session_id = session.id(), "[SessionPool] Cache hit");
                return Ok(Lookup::Hit(session));
            }
            Some(Slot::Ready(session)) => {
                // Closed without the notification having removed it yet
                let id = session.id();
                if state.remove_session(key.as_str(), id).is_some() {
                    debug!(key = %key, session_id = id, "[SessionPool] Dropped closed session");
                    self.inner.emit(PoolEvent::SessionClosed {
                        key: key.clone(),
                        session_id: id,
                    });
                }
            }
            Some(Slot::Pending(pending)) => {
                let outcome = pending.outcome.clone();
                state.touch(key.as_str());
                return Ok(Lookup::Join(outcome));
            }
            None => {}
        }

        let evicted = state
            .make_room()
            .map_err(|_| PoolError::CapacityContention {
                capacity: state.capacity(),
            })?;

        let id = self.inner.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (tx, outcome) = watch::channel(None);
        let cancel = self.inner.shutdown.child_token();
        state.insert(
            key.clone(),
            Slot::Pending(Pending {
                id,
                outcome: outcome.clone(),
                cancel: cancel.clone(),
            }),
        );
        debug!(key = %key, session_id = id, "[SessionPool] Cache miss, establishing");

        Ok(Lookup::Start {
            outcome,
            flight: Flight { id, tx, cancel },
            evicted,
        })
    }

    fn spawn_establish(&self, key: ConnectionKey, flight: Flight) {
        let inner = Arc::clone(&self.inner);
        let span = info_span!(
            "establish",
            key = %key,
            attempt_id = %attempt_id(self.inner.tag, flight.id),
            session_id = flight.id
        );

        tokio::spawn(
            async move {
                let Flight { id, tx, cancel } = flight;
                let guard = PendingGuard {
                    pool: Arc::downgrade(&inner),
                    key: key.clone(),
                    id,
                    tx: Some(tx),
                };

                let on_close = inner.close_hook(key.clone(), id);
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(PoolError::Cancelled { key: key.clone() }),
                    result = inner.establisher.establish(&key, id, on_close) => result,
                };

                let outcome = inner.complete(&key, id, result).await;
                guard.finish(outcome);
            }
            .instrument(span),
        );
    }

    /// Remove `key`, closing a ready session or cancelling a pending one.
    /// Returns whether anything was removed.
    pub async fn invalidate(&self, key: impl AsRef<str>) -> bool {
        let key = key.as_ref();
        let removed = self.inner.state.lock().remove(key);
        match removed {
            Some(Slot::Ready(session)) => {
                let _ = self
                    .inner
                    .retire_all(vec![session], EvictionReason::Invalidated)
                    .await;
                true
            }
            Some(Slot::Pending(pending)) => {
                info!(key = %key, "[SessionPool] Cancelling in-flight establishment");
                pending.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel in-flight establishments, close every session and refuse
    /// further acquisitions.
    pub async fn shutdown(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            self.inner.shutdown.cancel();
            state.drain()
        };

        let sessions: Vec<Arc<Session>> = drained
            .into_iter()
            .filter_map(|(_, slot)| match slot {
                Slot::Ready(session) => Some(session),
                Slot::Pending(_) => None,
            })
            .collect();

        info!(sessions = sessions.len(), "[SessionPool] Shutting down");
        let _ = self
            .inner
            .retire_all(sessions, EvictionReason::Shutdown)
            .await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        let (ready, pending) = state.counts();
        PoolStats {
            capacity: state.capacity(),
            ready,
            pending,
        }
    }

    /// Number of entries, ready and pending
    pub fn len(&self) -> usize {
        self.inner.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` has a ready or pending entry
    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.inner.state.lock().get(key.as_ref()).is_some()
    }

    /// Keys from least to most recently used
    pub fn keys_by_recency(&self) -> Vec<ConnectionKey> {
        self.inner.state.lock().keys_by_recency()
    }
}

impl PoolInner {
    fn emit(&self, event: PoolEvent) {
        trace!(event = event.type_name(), key = %event.key(), "[SessionPool] Emitting event");
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Close a session that has already been removed from the cache
    async fn retire(&self, session: &Session, reason: EvictionReason) {
        info!(
            key = %session.key(),
            session_id = session.id(),
            reason = ?reason,
            "[SessionPool] Evicting session"
        );
        self.emit(PoolEvent::SessionEvicted {
            key: session.key().clone(),
            session_id: session.id(),
            reason,
        });
        session.close().await;
    }

    /// Close removed sessions on a task of their own, so a caller that
    /// stops waiting cannot leave a transport half-closed
    fn retire_all(
        self: &Arc<Self>,
        sessions: Vec<Arc<Session>>,
        reason: EvictionReason,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            join_all(sessions.iter().map(|s| inner.retire(s, reason))).await;
        })
    }

    /// One-way notification from a transport back to the cache
    fn close_hook(self: &Arc<Self>, key: ConnectionKey, session_id: u64) -> CloseHook {
        let pool = Arc::downgrade(self);
        Box::new(move || {
            if let Some(pool) = pool.upgrade() {
                pool.on_transport_closed(&key, session_id);
            }
        })
    }

    fn on_transport_closed(&self, key: &ConnectionKey, session_id: u64) {
        let removed = self.state.lock().remove_session(key.as_str(), session_id);
        if removed.is_some() {
            info!(key = %key, session_id, "[SessionPool] Transport closed, session removed");
            self.emit(PoolEvent::SessionClosed {
                key: key.clone(),
                session_id,
            });
        }
    }

    /// Apply an establishment result to the cache before anyone sees it
    async fn complete(
        &self,
        key: &ConnectionKey,
        id: u64,
        result: Result<Established, PoolError>,
    ) -> EstablishResult {
        let Established { session, refreshed } = match result {
            Ok(established) => established,
            Err(error) => {
                self.state.lock().remove_pending(key.as_str(), id);
                warn!(key = %key, error = %error, "[SessionPool] Establishment failed");
                self.emit(PoolEvent::EstablishFailed {
                    key: key.clone(),
                    error: error.to_string(),
                });
                return Err(error);
            }
        };

        let session = Arc::new(session);
        let (installed, closed_early) = {
            let mut state = self.state.lock();
            if session.is_closed() {
                state.remove_pending(key.as_str(), id);
                (false, true)
            } else {
                (state.replace_pending(key.as_str(), id, Arc::clone(&session)), false)
            }
        };

        if installed {
            self.emit(PoolEvent::SessionEstablished {
                key: key.clone(),
                session_id: id,
                refreshed,
            });
            return Ok(session);
        }

        session.close().await;
        let error = if closed_early {
            PoolError::TransportError {
                key: key.clone(),
                message: "transport closed during establishment".to_string(),
            }
        } else {
            // Slot was invalidated or the pool shut down meanwhile
            PoolError::Cancelled { key: key.clone() }
        };
        warn!(key = %key, error = %error, "[SessionPool] Discarding established session");
        self.emit(PoolEvent::EstablishFailed {
            key: key.clone(),
            error: error.to_string(),
        });
        Err(error)
    }
}

/// Frees the pending slot if the establishment task never reports back
/// (aborted by runtime shutdown, or panicked)
struct PendingGuard {
    pool: Weak<PoolInner>,
    key: ConnectionKey,
    id: u64,
    tx: Option<watch::Sender<Option<EstablishResult>>>,
}

impl PendingGuard {
    fn finish(mut self, outcome: EstablishResult) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if let Some(pool) = self.pool.upgrade() {
            pool.state.lock().remove_pending(self.key.as_str(), self.id);
        }
        tx.send_replace(Some(Err(PoolError::Cancelled {
            key: self.key.clone(),
        })));
    }
}

async fn wait_for_outcome(
    key: &ConnectionKey,
    mut outcome: watch::Receiver<Option<EstablishResult>>,
) -> EstablishResult {
    match outcome.wait_for(Option::is_some).await {
        Ok(value) => value
            .clone()
            .unwrap_or_else(|| Err(PoolError::Cancelled { key: key.clone() })),
        Err(_) => Err(PoolError::Cancelled { key: key.clone() }),
    }
}
