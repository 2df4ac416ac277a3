//! Session - an established, authenticated handle to a remote server
//!
//! Each session owns exactly one connected transport. The pool hands out
//! `Arc<Session>`; the transport is closed when the pool drops the session
//! from its cache, not when the last consumer reference goes away.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use connmux_core::ConnectionKey;
use tracing::debug;

use crate::transport::Transport;

pub struct Session {
    key: ConnectionKey,
    id: u64,
    transport: Arc<dyn Transport>,
    established_at: Instant,
    /// Set by our own close and by the transport's close hook
    closed: Arc<AtomicBool>,
    /// Set once `Transport::close` has been issued
    close_issued: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        key: ConnectionKey,
        id: u64,
        transport: Arc<dyn Transport>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            key,
            id,
            transport,
            established_at: Instant::now(),
            closed,
            close_issued: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Pool-unique session id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The connected transport, for speaking the wire protocol
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    /// Whether the transport has closed, either by us or by the remote
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the underlying transport. Idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if self.close_issued.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(key = %self.key, session_id = self.id, "[Session] Closing transport");
        self.transport.close().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("transport", &self.transport.description())
            .field("closed", &self.is_closed())
            .finish()
    }
}
