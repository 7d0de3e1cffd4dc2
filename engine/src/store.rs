//! Authoritative session records, one per session id.
//!
//! Writers never hold a lock while computing: they load a versioned snapshot,
//! build the next state, and hand it back with the version they started from.
//! The store only commits if nobody else committed in between.

use crate::error::{LedgerError, LedgerResult};
use crate::MatchSession;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

/// A committed session state. Cheap to clone; readers keep it as a disposable copy.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub version: u64,
    pub session: Arc<MatchSession>,
}

pub trait SessionStore: Send + Sync {
    /// Adds a new record at version 1. Fails if the id is taken.
    fn insert(&self, session: MatchSession) -> LedgerResult<Versioned>;

    fn load(&self, id: &str) -> LedgerResult<Versioned>;

    /// Commits `next` only if the record is still at `expected_version`.
    /// `Ok(None)` means another writer got there first.
    fn compare_and_swap(&self, id: &str, expected_version: u64, next: MatchSession) -> LedgerResult<Option<Versioned>>;

    /// Receiver that observes every committed version from now on.
    fn subscribe(&self, id: &str) -> LedgerResult<watch::Receiver<Versioned>>;

    fn scan(&self, filter: &dyn Fn(&MatchSession) -> bool) -> Vec<Versioned>;
}

struct Slot {
    current: Mutex<Versioned>,
    tx: watch::Sender<Versioned>,
}

#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> LedgerResult<Arc<Slot>> {
        self.slots
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::SessionNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for MemoryStore {
    fn insert(&self, session: MatchSession) -> LedgerResult<Versioned> {
        let mut slots = self.slots.write();
        if slots.contains_key(&session.id) {
            return Err(LedgerError::DuplicateSession(session.id));
        }
        let id = session.id.clone();
        let record = Versioned { version: 1, session: Arc::new(session) };
        let (tx, _rx) = watch::channel(record.clone());
        slots.insert(id, Arc::new(Slot { current: Mutex::new(record.clone()), tx }));
        Ok(record)
    }

    fn load(&self, id: &str) -> LedgerResult<Versioned> {
        Ok(self.slot(id)?.current.lock().clone())
    }

    fn compare_and_swap(&self, id: &str, expected_version: u64, next: MatchSession) -> LedgerResult<Option<Versioned>> {
        let slot = self.slot(id)?;
        let mut current = slot.current.lock();
        if current.version != expected_version {
            return Ok(None);
        }
        let committed = Versioned { version: current.version + 1, session: Arc::new(next) };
        *current = committed.clone();
        // published under the slot lock so subscribers see versions in order
        slot.tx.send_replace(committed.clone());
        Ok(Some(committed))
    }

    fn subscribe(&self, id: &str) -> LedgerResult<watch::Receiver<Versioned>> {
        Ok(self.slot(id)?.tx.subscribe())
    }

    fn scan(&self, filter: &dyn Fn(&MatchSession) -> bool) -> Vec<Versioned> {
        let slots: Vec<Arc<Slot>> = self.slots.read().values().cloned().collect();
        slots
            .iter()
            .map(|slot| slot.current.lock().clone())
            .filter(|record| filter(&record.session))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OpponentKind, SessionStatus};

    fn session(id: &str) -> MatchSession {
        MatchSession {
            id: id.to_string(),
            players: vec![],
            status: SessionStatus::Waiting,
            opponent: OpponentKind::Human,
            symbol: "BTCUSDT".into(),
            price_history: vec![],
            created_at: 0,
            duration_seconds: 60,
            remaining_seconds: 60,
            host_id: "h".into(),
            chat_log: vec![],
            external_settlement_ref: None,
            finished_at: None,
            finish_reason: None,
        }
    }

    #[test]
    fn stale_version_is_refused() {
        let store = MemoryStore::new();
        let v1 = store.insert(session("ABC123")).unwrap();
        let mut next = (*v1.session).clone();
        next.remaining_seconds = 59;
        let v2 = store.compare_and_swap("ABC123", 1, next.clone()).unwrap().unwrap();
        assert_eq!(v2.version, 2);
        assert!(store.compare_and_swap("ABC123", 1, next).unwrap().is_none());
        assert_eq!(store.load("ABC123").unwrap().session.remaining_seconds, 59);
    }

    #[test]
    fn duplicate_and_missing_ids() {
        let store = MemoryStore::new();
        store.insert(session("A")).unwrap();
        assert_eq!(store.insert(session("A")).unwrap_err(), LedgerError::DuplicateSession("A".into()));
        assert_eq!(store.load("B").unwrap_err(), LedgerError::SessionNotFound("B".into()));
    }

    #[test]
    fn subscribers_see_commits() {
        let store = MemoryStore::new();
        store.insert(session("A")).unwrap();
        let mut rx = store.subscribe("A").unwrap();
        let next = session("A");
        store.compare_and_swap("A", 1, next).unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().version, 2);
    }

    #[test]
    fn scan_filters() {
        let store = MemoryStore::new();
        store.insert(session("A")).unwrap();
        let mut b = session("B");
        b.status = SessionStatus::Finished;
        store.insert(b).unwrap();
        let finished = store.scan(&|s: &MatchSession| s.is_finished());
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].session.id, "B");
    }
}
