//! Debounced autosave of dirty sessions to the persistent store.
//!
//! The scheduler runs on a fixed interval and persists sessions that have
//! unsaved changes older than a short quiet period, so bursts of keystrokes
//! collapse into one write. A failed save is logged and retried on the next
//! tick; in-memory edits are never lost to a failed autosave.

use crate::{SessionRegistry, lock};
use codoc_core::DocumentId;
use codoc_storage::DocumentStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// How often the scheduler scans live sessions.
    pub interval: Duration,
    /// Quiet period a session must have been idle before it is saved.
    pub min_dirty_age: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            min_dirty_age: Duration::from_secs(2),
        }
    }
}

/// What one scheduler tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub saved: usize,
    pub failed: usize,
    /// Documents skipped because a save was already in flight.
    pub skipped: usize,
}

/// Periodically flushes dirty sessions to the store.
pub struct Autosaver {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn DocumentStore>,
    in_flight: Mutex<HashSet<DocumentId>>,
    config: AutosaveConfig,
}

enum SaveOutcome {
    Clean,
    Saved,
    Failed,
}

impl Autosaver {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn DocumentStore>,
        config: AutosaveConfig,
    ) -> Self {
        Self {
            registry,
            store,
            in_flight: Mutex::new(HashSet::new()),
            config,
        }
    }

    /// One scheduler pass over all live sessions.
    pub fn tick(&self) -> TickReport {
        self.tick_at(Instant::now())
    }

    /// Deterministic entry point: one pass evaluated at `now`.
    pub fn tick_at(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        for document_id in self.registry.document_ids() {
            // Per-document guard: never two concurrent saves for one document.
            if !lock(&self.in_flight).insert(document_id) {
                report.skipped += 1;
                continue;
            }
            let outcome = self.save_if_dirty(&document_id, now);
            lock(&self.in_flight).remove(&document_id);
            match outcome {
                SaveOutcome::Clean => {}
                SaveOutcome::Saved => report.saved += 1,
                SaveOutcome::Failed => report.failed += 1,
            }
        }
        report
    }

    fn save_if_dirty(&self, document_id: &DocumentId, now: Instant) -> SaveOutcome {
        let Some(snapshot) =
            self.registry
                .dirty_snapshot(document_id, self.config.min_dirty_age, now)
        else {
            return SaveOutcome::Clean;
        };
        match self
            .store
            .save_content(document_id, &snapshot.text, snapshot.version)
        {
            Ok(()) => {
                self.registry.mark_persisted(document_id, snapshot.updated_at);
                tracing::debug!(
                    document_id = %document_id,
                    version = snapshot.version,
                    "autosaved"
                );
                SaveOutcome::Saved
            }
            Err(err) => {
                // Leave the session dirty; the next tick retries.
                tracing::warn!(
                    document_id = %document_id,
                    error = %err,
                    "autosave failed, will retry"
                );
                SaveOutcome::Failed
            }
        }
    }

    /// Starts a background thread driving [`Autosaver::tick`] on the
    /// configured interval. The thread stops when the handle is shut down
    /// or dropped.
    pub fn spawn(self: Arc<Self>) -> AutosaveHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let saver = self;
        let handle = thread::Builder::new()
            .name("codoc-autosave".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(saver.config.interval);
                    if flag.load(Ordering::Relaxed) {
                        break;
                    }
                    saver.tick();
                }
            })
            .expect("failed to spawn autosave thread");
        AutosaveHandle {
            shutdown,
            handle: Some(handle),
        }
    }
}

/// Owns the background autosave thread; shuts it down on drop.
pub struct AutosaveHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AutosaveHandle {
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AutosaveHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
