//! Session registry: creation, activity tracking, statistics, and removal.
//!
//! Every session lives in its own slot behind its own mutex. The outer map
//! lock is only held to look up, insert, or remove a slot, never while
//! waiting on a slot, so requests for different sessions do not contend.
//! Expiry decisions are taken under the slot lock, which makes "is this
//! session idle?" and "remove it" one atomic step with respect to touches.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use proview_core::error::{ProviewError, Result};
use proview_core::types::{Session, SessionId, SessionStats};

/// Deletes the stored documents of one session.
///
/// Called by the registry while it holds the session's slot lock, right
/// before the registry entry itself is dropped.
pub trait SessionPurge: Send + Sync {
    /// Remove everything stored for `session_id`, returning how many chunks
    /// were deleted. Must be idempotent.
    fn purge_session(&self, session_id: &SessionId) -> Result<usize>;
}

impl SessionPurge for proview_vector::VectorIndex {
    fn purge_session(&self, session_id: &SessionId) -> Result<usize> {
        self.delete_session(session_id)
    }
}

#[derive(Debug)]
struct SessionEntry {
    session: Session,
    /// Set once the slot has been dropped from the map; a caller that
    /// raced the removal must look the session up again.
    removed: bool,
}

type Slot = Arc<Mutex<SessionEntry>>;

/// Concurrent map of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create-or-update a session's last activity.
    ///
    /// Returns `true` when this call created the session.
    pub fn touch(&self, session_id: &SessionId) -> Result<bool> {
        self.touch_at(session_id, Utc::now())
    }

    pub fn touch_at(&self, session_id: &SessionId, now: DateTime<Utc>) -> Result<bool> {
        self.upsert_at(session_id, now, |_| Ok(())).map(|(created, ())| created)
    }

    /// Touch a session and count one chat turn against it.
    pub fn record_message(&self, session_id: &SessionId) -> Result<bool> {
        self.upsert_at(session_id, Utc::now(), |session| {
            session.record_message();
            Ok(())
        })
        .map(|(created, ())| created)
    }

    /// Touch a session and run `f` on it under the session lock.
    ///
    /// The session is created if absent. `f` runs exactly once, on a live
    /// session, so work done inside it cannot interleave with an eviction
    /// of the same session. Returns whether the session was created along
    /// with `f`'s result.
    pub fn upsert<R>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<(bool, R)> {
        self.upsert_at(session_id, Utc::now(), f)
    }

    fn upsert_at<R>(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Session) -> Result<R>,
    ) -> Result<(bool, R)> {
        let mut created = false;
        loop {
            if let Some(slot) = self.slot(session_id)? {
                let mut entry = lock_slot(&slot)?;
                if entry.removed {
                    continue;
                }
                if now > entry.session.last_activity {
                    entry.session.last_activity = now;
                }
                let result = f(&mut entry.session)?;
                return Ok((created, result));
            }

            let mut sessions = self.write_map()?;
            if let Entry::Vacant(vacant) = sessions.entry(session_id.clone()) {
                vacant.insert(Arc::new(Mutex::new(SessionEntry {
                    session: Session::new(session_id.clone(), now),
                    removed: false,
                })));
                created = true;
                debug!(session_id = %session_id.short(), "Session created");
            }
        }
    }

    /// Statistics for a live session; `NotFound` if unknown.
    pub fn stats(&self, session_id: &SessionId) -> Result<SessionStats> {
        let slot = self
            .slot(session_id)?
            .ok_or_else(|| not_found(session_id))?;
        let entry = lock_slot(&slot)?;
        if entry.removed {
            return Err(not_found(session_id));
        }
        Ok(entry.session.stats())
    }

    /// Ids of every session idle for longer than `timeout` at `now`.
    ///
    /// Pure query: nothing is modified. Sorted for deterministic cycles.
    pub fn expired(&self, now: DateTime<Utc>, timeout: Duration) -> Result<Vec<SessionId>> {
        let slots: Vec<Slot> = self.read_map()?.values().cloned().collect();

        let mut ids = Vec::new();
        for slot in slots {
            let entry = lock_slot(&slot)?;
            if !entry.removed && entry.session.is_expired(now, timeout) {
                ids.push(entry.session.id.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Evict a session if it is still expired at `now`.
    ///
    /// The expiry check, the purge of its documents, and the registry
    /// removal all happen under the session lock, so a touch that lands
    /// first keeps the session alive and a touch that lands after sees a
    /// fresh session. Documents are purged before the entry is removed; a
    /// failed purge leaves the session registered.
    ///
    /// Returns `Some(chunks_deleted)` if evicted, `None` if still active or
    /// already gone.
    pub fn evict_if_expired(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
        timeout: Duration,
        purge: &dyn SessionPurge,
    ) -> Result<Option<usize>> {
        self.evict_when(session_id, purge, |session| session.is_expired(now, timeout))
    }

    /// Unconditionally purge and remove a session.
    ///
    /// Idempotent: returns `None` for an unknown session.
    pub fn evict(&self, session_id: &SessionId, purge: &dyn SessionPurge) -> Result<Option<usize>> {
        self.evict_when(session_id, purge, |_| true)
    }

    /// Drop registry state for a session without touching its documents.
    ///
    /// Idempotent: returns `false` for an unknown session.
    pub fn remove(&self, session_id: &SessionId) -> Result<bool> {
        let Some(slot) = self.slot(session_id)? else {
            return Ok(false);
        };
        let mut entry = lock_slot(&slot)?;
        if entry.removed {
            return Ok(false);
        }
        self.unlink(session_id, &slot, &mut entry)?;
        Ok(true)
    }

    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.stats(session_id).is_ok()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_when(
        &self,
        session_id: &SessionId,
        purge: &dyn SessionPurge,
        should_evict: impl FnOnce(&Session) -> bool,
    ) -> Result<Option<usize>> {
        let Some(slot) = self.slot(session_id)? else {
            return Ok(None);
        };
        let mut entry = lock_slot(&slot)?;
        if entry.removed || !should_evict(&entry.session) {
            return Ok(None);
        }

        let deleted = purge.purge_session(session_id)?;
        self.unlink(session_id, &slot, &mut entry)?;
        Ok(Some(deleted))
    }

    /// Mark a locked slot removed and drop it from the map.
    ///
    /// Lock order is always slot, then map.
    fn unlink(&self, session_id: &SessionId, slot: &Slot, entry: &mut SessionEntry) -> Result<()> {
        entry.removed = true;
        let mut sessions = self.write_map()?;
        if sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(session_id);
        }
        Ok(())
    }

    fn slot(&self, session_id: &SessionId) -> Result<Option<Slot>> {
        Ok(self.read_map()?.get(session_id).cloned())
    }

    fn read_map(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<SessionId, Slot>>> {
        self.sessions
            .read()
            .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn write_map(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Slot>>> {
        self.sessions
            .write()
            .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))
    }
}

fn lock_slot(slot: &Slot) -> Result<MutexGuard<'_, SessionEntry>> {
    slot.lock()
        .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))
}

fn not_found(session_id: &SessionId) -> ProviewError {
    ProviewError::NotFound(format!("Session {} not found", session_id.short()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    /// Counts purges and reports a fixed number of deleted chunks.
    #[derive(Default)]
    struct CountingPurge {
        calls: AtomicUsize,
    }

    impl SessionPurge for CountingPurge {
        fn purge_session(&self, _session_id: &SessionId) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(4)
        }
    }

    struct FailingPurge;

    impl SessionPurge for FailingPurge {
        fn purge_session(&self, _session_id: &SessionId) -> Result<usize> {
            Err(ProviewError::Storage("disk on fire".to_string()))
        }
    }

    #[test]
    fn test_touch_creates_then_updates() {
        let registry = SessionRegistry::new();
        let id = sid("session-touch");
        let t0 = Utc::now();

        assert!(registry.touch_at(&id, t0).unwrap());
        assert!(!registry.touch_at(&id, t0 + chrono::Duration::seconds(5)).unwrap());

        let stats = registry.stats(&id).unwrap();
        assert_eq!(stats.created_at, t0);
        assert_eq!(stats.last_activity, t0 + chrono::Duration::seconds(5));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_touch_never_moves_activity_backwards() {
        let registry = SessionRegistry::new();
        let id = sid("session-mono");
        let t0 = Utc::now();

        registry.touch_at(&id, t0).unwrap();
        registry.touch_at(&id, t0 - chrono::Duration::seconds(30)).unwrap();
        assert_eq!(registry.stats(&id).unwrap().last_activity, t0);
    }

    #[test]
    fn test_stats_unknown_session_is_not_found() {
        let registry = SessionRegistry::new();
        let err = registry.stats(&sid("never-seen")).unwrap_err();
        assert!(matches!(err, ProviewError::NotFound(_)));
    }

    #[test]
    fn test_record_message_counts_turns() {
        let registry = SessionRegistry::new();
        let id = sid("session-messages");

        assert!(registry.record_message(&id).unwrap());
        assert!(!registry.record_message(&id).unwrap());
        assert_eq!(registry.stats(&id).unwrap().message_count, 2);
    }

    #[test]
    fn test_upsert_runs_closure_on_live_session() {
        let registry = SessionRegistry::new();
        let id = sid("session-upsert");

        let (created, chunks) = registry
            .upsert(&id, |session| {
                session.record_upload("resume.pdf", 3);
                Ok(3)
            })
            .unwrap();
        assert!(created);
        assert_eq!(chunks, 3);

        let stats = registry.stats(&id).unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.source_files, vec!["resume.pdf"]);
    }

    #[test]
    fn test_upsert_propagates_closure_error() {
        let registry = SessionRegistry::new();
        let id = sid("session-upsert-err");
        let err = registry
            .upsert(&id, |_| -> Result<()> { Err(ProviewError::Storage("boom".into())) })
            .unwrap_err();
        assert!(matches!(err, ProviewError::Storage(_)));
        // The touch itself still happened.
        assert!(registry.contains(&id));
    }

    #[test]
    fn test_expired_is_pure_and_strict() {
        let registry = SessionRegistry::new();
        let t0 = Utc::now();
        registry.touch_at(&sid("session-old"), t0).unwrap();
        registry
            .touch_at(&sid("session-new"), t0 + chrono::Duration::seconds(50))
            .unwrap();

        let now = t0 + chrono::Duration::seconds(61);
        assert_eq!(registry.expired(now, TIMEOUT).unwrap(), vec![sid("session-old")]);
        // Nothing was removed by the query.
        assert_eq!(registry.len(), 2);

        // Exactly at the timeout boundary is not expired.
        assert!(registry
            .expired(t0 + chrono::Duration::seconds(60), TIMEOUT)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_evict_if_expired_purges_then_removes() {
        let registry = SessionRegistry::new();
        let purge = CountingPurge::default();
        let id = sid("session-evict");
        let t0 = Utc::now();
        registry.touch_at(&id, t0).unwrap();

        let now = t0 + chrono::Duration::seconds(120);
        assert_eq!(registry.evict_if_expired(&id, now, TIMEOUT, &purge).unwrap(), Some(4));
        assert_eq!(purge.calls.load(Ordering::SeqCst), 1);
        assert!(!registry.contains(&id));

        // Re-running is a no-op.
        assert_eq!(registry.evict_if_expired(&id, now, TIMEOUT, &purge).unwrap(), None);
        assert_eq!(purge.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_touch_after_scan_keeps_session() {
        let registry = SessionRegistry::new();
        let purge = CountingPurge::default();
        let id = sid("session-race");
        let t0 = Utc::now();
        registry.touch_at(&id, t0).unwrap();

        let scan_time = t0 + chrono::Duration::seconds(120);
        let candidates = registry.expired(scan_time, TIMEOUT).unwrap();
        assert_eq!(candidates, vec![id.clone()]);

        // The user comes back between the scan and the eviction.
        registry.touch_at(&id, scan_time + chrono::Duration::seconds(1)).unwrap();

        assert_eq!(
            registry.evict_if_expired(&id, scan_time, TIMEOUT, &purge).unwrap(),
            None
        );
        assert!(registry.contains(&id));
        assert_eq!(purge.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_purge_keeps_registry_entry() {
        let registry = SessionRegistry::new();
        let id = sid("session-failing");
        let t0 = Utc::now();
        registry.touch_at(&id, t0).unwrap();

        let err = registry
            .evict_if_expired(&id, t0 + chrono::Duration::seconds(120), TIMEOUT, &FailingPurge)
            .unwrap_err();
        assert!(matches!(err, ProviewError::Storage(_)));
        assert!(registry.contains(&id));
    }

    #[test]
    fn test_evict_unconditional_and_idempotent() {
        let registry = SessionRegistry::new();
        let purge = CountingPurge::default();
        let id = sid("session-clear");
        registry.touch(&id).unwrap();

        assert_eq!(registry.evict(&id, &purge).unwrap(), Some(4));
        assert_eq!(registry.evict(&id, &purge).unwrap(), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_touch_after_eviction_creates_fresh_session() {
        let registry = SessionRegistry::new();
        let purge = CountingPurge::default();
        let id = sid("session-reborn");
        registry.record_message(&id).unwrap();
        registry.evict(&id, &purge).unwrap();

        assert!(registry.touch(&id).unwrap());
        assert_eq!(registry.stats(&id).unwrap().message_count, 0);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = sid("session-remove");
        registry.touch(&id).unwrap();

        assert!(registry.remove(&id).unwrap());
        assert!(!registry.remove(&id).unwrap());
        assert!(!registry.remove(&sid("never-seen")).unwrap());
    }

    #[test]
    fn test_concurrent_touches_on_distinct_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let id = SessionId::parse(format!("thread-session-{}", t)).unwrap();
                    for _ in 0..100 {
                        registry.record_message(&id).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 8);
        for t in 0..8 {
            let id = SessionId::parse(format!("thread-session-{}", t)).unwrap();
            assert_eq!(registry.stats(&id).unwrap().message_count, 100);
        }
    }

    #[test]
    fn test_concurrent_touch_and_evict_same_session() {
        let registry = Arc::new(SessionRegistry::new());
        let purge = Arc::new(CountingPurge::default());
        let id = sid("session-contended");

        let toucher = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    registry.record_message(&id).unwrap();
                }
            })
        };
        let evicter = {
            let registry = Arc::clone(&registry);
            let purge = Arc::clone(&purge);
            let id = id.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    registry.evict(&id, purge.as_ref()).unwrap();
                }
            })
        };
        toucher.join().unwrap();
        evicter.join().unwrap();

        // The map never holds more than one slot per id.
        assert!(registry.len() <= 1);
        if registry.contains(&id) {
            assert!(registry.stats(&id).unwrap().message_count <= 500);
        }
    }
}
