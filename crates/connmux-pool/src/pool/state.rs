//! Cache state - key to entry map plus recency order
//!
//! Pure bookkeeping with no I/O; always accessed under the pool's mutex so
//! every insert, promote, evict and remove is atomic relative to the others.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use connmux_core::ConnectionKey;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;
use crate::session::Session;

/// Result shared by every joiner of one establishment
pub(crate) type EstablishResult = Result<Arc<Session>, PoolError>;

/// In-flight establishment for a key
pub(crate) struct Pending {
    /// Id the session will carry on success
    pub id: u64,
    pub outcome: watch::Receiver<Option<EstablishResult>>,
    pub cancel: CancellationToken,
}

/// Cache entry: callers await a pending slot or use a ready one directly
pub(crate) enum Slot {
    Pending(Pending),
    Ready(Arc<Session>),
}

impl Slot {
    pub fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending(_))
    }
}

struct Entry {
    slot: Slot,
    tick: u64,
}

/// Evicting would have to remove an in-flight establishment
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct NoEvictableEntry;

pub(crate) struct CacheState {
    entries: HashMap<ConnectionKey, Entry>,
    /// tick -> key, oldest first
    recency: BTreeMap<u64, ConnectionKey>,
    next_tick: u64,
    capacity: usize,
}

impl CacheState {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&Slot> {
        self.entries.get(key).map(|e| &e.slot)
    }

    /// (ready, pending)
    pub fn counts(&self) -> (usize, usize) {
        let pending = self.entries.values().filter(|e| e.slot.is_pending()).count();
        (self.entries.len() - pending, pending)
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Move `key` to the most-recently-used end
    pub fn touch(&mut self, key: &str) {
        let tick = self.bump();
        if let Some(entry) = self.entries.get_mut(key) {
            if let Some(k) = self.recency.remove(&entry.tick) {
                entry.tick = tick;
                self.recency.insert(tick, k);
            }
        }
    }

    /// Insert at the most-recently-used end. Callers make room first.
    pub fn insert(&mut self, key: ConnectionKey, slot: Slot) {
        if let Some(old) = self.entries.remove(key.as_str()) {
            self.recency.remove(&old.tick);
        }
        let tick = self.bump();
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, Entry { slot, tick });
    }

    pub fn remove(&mut self, key: &str) -> Option<Slot> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry.slot)
    }

    /// Swap the pending slot `id` for its session. False when the slot is
    /// gone or belongs to a newer attempt.
    pub fn replace_pending(&mut self, key: &str, id: u64, session: Arc<Session>) -> bool {
        if !matches!(self.get(key), Some(Slot::Pending(p)) if p.id == id) {
            return false;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.slot = Slot::Ready(session);
        }
        self.touch(key);
        true
    }

    /// Remove the pending slot `id`, leaving any newer entry alone
    pub fn remove_pending(&mut self, key: &str, id: u64) -> bool {
        if matches!(self.get(key), Some(Slot::Pending(p)) if p.id == id) {
            self.remove(key);
            true
        } else {
            false
        }
    }

    /// Remove the ready session `session_id`, leaving any newer entry alone
    pub fn remove_session(&mut self, key: &str, session_id: u64) -> Option<Arc<Session>> {
        if matches!(self.get(key), Some(Slot::Ready(s)) if s.id() == session_id) {
            match self.remove(key) {
                Some(Slot::Ready(session)) => Some(session),
                _ => None,
            }
        } else {
            None
        }
    }

    /// Evict least-recently-used ready sessions until one more entry fits.
    ///
    /// Pending entries are skipped. If not enough ready sessions exist nothing
    /// is evicted.
    pub fn make_room(&mut self) -> Result<Vec<Arc<Session>>, NoEvictableEntry> {
        let needed = (self.entries.len() + 1).saturating_sub(self.capacity);
        if needed == 0 {
            return Ok(Vec::new());
        }

        let victims: Vec<ConnectionKey> = self
            .recency
            .values()
            .filter(|k| matches!(self.get(k.as_str()), Some(Slot::Ready(_))))
            .take(needed)
            .cloned()
            .collect();

        if victims.len() < needed {
            return Err(NoEvictableEntry);
        }

        Ok(victims
            .iter()
            .filter_map(|k| match self.remove(k.as_str()) {
                Some(Slot::Ready(session)) => Some(session),
                _ => None,
            })
            .collect())
    }

    /// Remove everything, oldest first
    pub fn drain(&mut self) -> Vec<(ConnectionKey, Slot)> {
        let order: Vec<ConnectionKey> = self.recency.values().cloned().collect();
        self.recency.clear();
        order
            .into_iter()
            .filter_map(|k| self.entries.remove(k.as_str()).map(|e| (k, e.slot)))
            .collect()
    }

    /// Keys from least to most recently used
    pub fn keys_by_recency(&self) -> Vec<ConnectionKey> {
        self.recency.values().cloned().collect()
    }
}
