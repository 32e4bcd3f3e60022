//! Background janitor that evicts idle sessions.
//!
//! Each cycle scans the registry for expired sessions and evicts them one by
//! one: documents first, then the registry entry. A failure on one session
//! is logged and reported, and the cycle moves on to the next.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use proview_core::types::SessionId;

use crate::registry::{SessionPurge, SessionRegistry};

/// A session the cycle could not evict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupFailure {
    pub session_id: SessionId,
    pub error: String,
}

/// Outcome of one cleanup cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Sessions registered when the cycle started.
    pub scanned: usize,
    pub evicted: usize,
    /// Expired at scan time but touched again before eviction.
    pub still_active: usize,
    pub chunks_deleted: usize,
    pub failures: Vec<CleanupFailure>,
}

/// Periodic session eviction with an explicit start/stop lifecycle.
///
/// Tests drive cycles directly through [`Janitor::run_cycle_at`].
pub struct Janitor {
    registry: Arc<SessionRegistry>,
    purge: Arc<dyn SessionPurge>,
    timeout: Duration,
    interval: Duration,
    task: Mutex<Option<RunningLoop>>,
}

/// A spawned loop and the signal that ends it; a fresh pair per `start`.
struct RunningLoop {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for Janitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Janitor")
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Janitor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        purge: Arc<dyn SessionPurge>,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            purge,
            timeout,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Spawn the background loop. Calling `start` on a running janitor is a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut task) = self.task.lock() else {
            warn!("Janitor task lock poisoned; not starting");
            return;
        };
        if task.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let janitor = Arc::clone(self);
        let signal = Arc::clone(&shutdown);
        *task = Some(RunningLoop {
            handle: tokio::spawn(async move { janitor.run(signal).await }),
            shutdown,
        });
        info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "Session janitor started"
        );
    }

    /// Signal the loop to stop and wait for it to finish.
    ///
    /// A no-op when the loop is not running.
    pub async fn stop(&self) {
        let running = self.task.lock().ok().and_then(|mut task| task.take());
        if let Some(RunningLoop { handle, shutdown }) = running {
            shutdown.notify_one();
            if let Err(e) = handle.await {
                warn!(error = %e, "Session janitor task ended abnormally");
            }
            info!("Session janitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|running| !running.handle.is_finished()))
            .unwrap_or(false)
    }

    async fn run(&self, shutdown: Arc<Notify>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.run_cycle();
                }
                _ = shutdown.notified() => {
                    return;
                }
            }
        }
    }

    /// Run one cleanup cycle now.
    pub fn run_cycle(&self) -> CleanupReport {
        self.run_cycle_at(Utc::now())
    }

    /// Run one cleanup cycle as if the current time were `now`.
    pub fn run_cycle_at(&self, now: DateTime<Utc>) -> CleanupReport {
        let mut report = CleanupReport {
            scanned: self.registry.len(),
            ..CleanupReport::default()
        };

        let expired = match self.registry.expired(now, self.timeout) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Session scan failed");
                return report;
            }
        };

        for session_id in expired {
            match self
                .registry
                .evict_if_expired(&session_id, now, self.timeout, self.purge.as_ref())
            {
                Ok(Some(chunks)) => {
                    report.evicted += 1;
                    report.chunks_deleted += chunks;
                    debug!(session_id = %session_id.short(), chunks, "Expired session evicted");
                }
                Ok(None) => report.still_active += 1,
                Err(e) => {
                    warn!(session_id = %session_id.short(), error = %e, "Failed to evict session");
                    report.failures.push(CleanupFailure {
                        session_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.evicted > 0 || !report.failures.is_empty() {
            info!(
                scanned = report.scanned,
                evicted = report.evicted,
                chunks_deleted = report.chunks_deleted,
                failures = report.failures.len(),
                "Session cleanup cycle complete"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proview_core::error::{ProviewError, Result};
    use proview_vector::chunker::TextSpan;
    use proview_vector::index::{ChunkMetadata, VectorIndex};

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn store_chunks(index: &VectorIndex, id: &SessionId, n: usize) {
        let spans: Vec<TextSpan> = (0..n)
            .map(|i| TextSpan {
                index: i,
                start: 0,
                end: 4,
                text: "text".to_string(),
            })
            .collect();
        index
            .insert(id, &spans, vec![vec![1.0, 0.0]; n], &ChunkMetadata::new("resume.pdf"))
            .unwrap();
    }

    fn janitor(registry: &Arc<SessionRegistry>, purge: Arc<dyn SessionPurge>) -> Arc<Janitor> {
        Arc::new(Janitor::new(
            Arc::clone(registry),
            purge,
            TIMEOUT,
            Duration::from_secs(3600),
        ))
    }

    /// Fails for one specific session and delegates for the rest.
    struct FailFor {
        bad: SessionId,
        index: Arc<VectorIndex>,
    }

    impl SessionPurge for FailFor {
        fn purge_session(&self, session_id: &SessionId) -> Result<usize> {
            if *session_id == self.bad {
                Err(ProviewError::Storage("partition unavailable".to_string()))
            } else {
                self.index.purge_session(session_id)
            }
        }
    }

    #[test]
    fn test_cycle_evicts_expired_sessions_and_vectors() {
        let registry = Arc::new(SessionRegistry::new());
        let index = Arc::new(VectorIndex::new());
        let t0 = Utc::now();

        let old = sid("session-old");
        let fresh = sid("session-fresh");
        registry.touch_at(&old, t0).unwrap();
        registry.touch_at(&fresh, t0 + chrono::Duration::seconds(100)).unwrap();
        store_chunks(&index, &old, 3);
        store_chunks(&index, &fresh, 2);

        let janitor = janitor(&registry, index.clone());
        let report = janitor.run_cycle_at(t0 + chrono::Duration::seconds(120));

        assert_eq!(report.scanned, 2);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.chunks_deleted, 3);
        assert!(report.failures.is_empty());
        assert!(!registry.contains(&old));
        assert!(registry.contains(&fresh));
        assert_eq!(index.chunk_count(&old).unwrap(), 0);
        assert_eq!(index.chunk_count(&fresh).unwrap(), 2);
    }

    #[test]
    fn test_cycle_is_idempotent() {
        let registry = Arc::new(SessionRegistry::new());
        let index = Arc::new(VectorIndex::new());
        let t0 = Utc::now();
        registry.touch_at(&sid("session-once"), t0).unwrap();

        let janitor = janitor(&registry, index);
        let now = t0 + chrono::Duration::seconds(120);
        assert_eq!(janitor.run_cycle_at(now).evicted, 1);

        let second = janitor.run_cycle_at(now);
        assert_eq!(second, CleanupReport::default());
    }

    #[test]
    fn test_failure_on_one_session_does_not_abort_cycle() {
        let registry = Arc::new(SessionRegistry::new());
        let index = Arc::new(VectorIndex::new());
        let t0 = Utc::now();

        let bad = sid("session-aaaa-bad");
        let good = sid("session-zzzz-good");
        registry.touch_at(&bad, t0).unwrap();
        registry.touch_at(&good, t0).unwrap();
        store_chunks(&index, &bad, 1);
        store_chunks(&index, &good, 1);

        let purge = Arc::new(FailFor {
            bad: bad.clone(),
            index: Arc::clone(&index),
        });
        let janitor = janitor(&registry, purge);
        let report = janitor.run_cycle_at(t0 + chrono::Duration::seconds(120));

        assert_eq!(report.evicted, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].session_id, bad);
        // The failed session keeps both its registry entry and its vectors.
        assert!(registry.contains(&bad));
        assert_eq!(index.chunk_count(&bad).unwrap(), 1);
        assert!(!registry.contains(&good));
    }

    #[test]
    fn test_report_serializes() {
        let report = CleanupReport {
            scanned: 3,
            evicted: 1,
            still_active: 0,
            chunks_deleted: 7,
            failures: vec![],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["chunks_deleted"], 7);
        assert!(json["failures"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let registry = Arc::new(SessionRegistry::new());
        let janitor = janitor(&registry, Arc::new(VectorIndex::new()));

        janitor.start();
        assert!(janitor.is_running());

        tokio::time::timeout(Duration::from_secs(2), janitor.stop())
            .await
            .expect("Janitor should stop within timeout");
        assert!(!janitor.is_running());
    }

    #[tokio::test]
    async fn test_stop_before_start_is_harmless() {
        let registry = Arc::new(SessionRegistry::new());
        let janitor = janitor(&registry, Arc::new(VectorIndex::new()));
        janitor.stop().await;
        assert!(!janitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop_still_evicts() {
        let registry = Arc::new(SessionRegistry::new());
        let janitor = Arc::new(Janitor::new(
            Arc::clone(&registry),
            Arc::new(VectorIndex::new()),
            Duration::ZERO,
            Duration::from_secs(10),
        ));

        // Stop with no loop, then a full start/stop round, then start again.
        janitor.stop().await;
        janitor.start();
        janitor.stop().await;
        janitor.stop().await;
        janitor.start();
        tokio::task::yield_now().await;
        assert!(janitor.is_running());

        let id = sid("session-restarted");
        registry
            .touch_at(&id, Utc::now() - chrono::Duration::seconds(5))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        assert!(janitor.is_running());
        assert!(!registry.contains(&id));
        janitor.stop().await;
        assert!(!janitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_evicts_on_interval() {
        let registry = Arc::new(SessionRegistry::new());
        let janitor = Arc::new(Janitor::new(
            Arc::clone(&registry),
            Arc::new(VectorIndex::new()),
            Duration::ZERO,
            Duration::from_secs(10),
        ));
        let id = sid("session-background");
        registry
            .touch_at(&id, Utc::now() - chrono::Duration::seconds(5))
            .unwrap();

        janitor.start();
        tokio::time::sleep(Duration::from_secs(11)).await;
        // Yield so the janitor task can finish its cycle.
        tokio::task::yield_now().await;

        assert!(!registry.contains(&id));
        janitor.stop().await;
    }
}
