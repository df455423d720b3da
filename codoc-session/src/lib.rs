//! In-memory session registry for actively edited documents.
//!
//! One [`DocumentSession`] exists per document; it is the authoritative
//! in-memory state between autosaves. All mutation for a document goes
//! through that document's slot mutex, so commits are strictly serialized
//! per document while different documents proceed in parallel.

use codoc_core::{DocumentId, Operation, Version, transform};
use codoc_storage::{DocumentStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub mod autosave;

pub use autosave::{AutosaveConfig, AutosaveHandle, Autosaver, TickReport};

/// Default bound on the tail of applied operations kept for rebasing.
pub const DEFAULT_OPS_TAIL_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Most recent committed operations retained per session; enough to
    /// rebase a client that is a few versions behind, not a full history.
    pub ops_tail_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ops_tail_limit: DEFAULT_OPS_TAIL_LIMIT,
        }
    }
}

/// A committed operation tagged with the version its batch produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedOp {
    pub op: Operation,
    pub version: Version,
}

/// The in-memory state for one actively edited document.
///
/// Callers only ever see clones of this; the registry exclusively owns
/// mutation of `text`, `version` and `applied_ops_tail`.
#[derive(Debug, Clone)]
pub struct DocumentSession {
    pub document_id: DocumentId,
    pub text: String,
    pub version: Version,
    pub applied_ops_tail: Vec<CommittedOp>,
    pub loaded_at: Instant,
    pub updated_at: Instant,
    pub last_persisted_at: Instant,
}

impl DocumentSession {
    /// Operations committed after `base_version`, in commit order.
    pub fn ops_since(&self, base_version: Version) -> Vec<Operation> {
        self.applied_ops_tail
            .iter()
            .filter(|committed| committed.version > base_version)
            .map(|committed| committed.op.clone())
            .collect()
    }

    /// Oldest base version the retained tail can still rebase from.
    pub fn history_floor(&self) -> Version {
        self.applied_ops_tail
            .first()
            .map(|committed| committed.version.saturating_sub(1))
            .unwrap_or(self.version)
    }

    fn is_dirty(&self) -> bool {
        self.updated_at > self.last_persisted_at
    }
}

/// The result of committing one submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBatch {
    pub ops_applied: Vec<Operation>,
    pub new_version: Version,
}

/// Snapshot handed to the autosave scheduler for one dirty session.
#[derive(Debug, Clone)]
pub struct SaveSnapshot {
    pub text: String,
    pub version: Version,
    pub updated_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("base version {base_version} is older than the retained history (floor {floor})")]
    StaleBaseVersion { base_version: Version, floor: Version },
}

type Slot = Arc<Mutex<Option<DocumentSession>>>;

/// Registry of live document sessions, keyed by document id.
///
/// Sessions are created lazily from the store on first access and live until
/// the hosting process shuts down.
pub struct SessionRegistry {
    store: Arc<dyn DocumentStore>,
    sessions: Mutex<HashMap<DocumentId, Slot>>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, SessionConfig::default())
    }

    pub fn with_config(store: Arc<dyn DocumentStore>, config: SessionConfig) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Returns the existing session for `document_id`, loading it from the
    /// store (or defaulting to an empty document) on first access.
    ///
    /// Concurrent callers for the same document converge on a single session
    /// instance. A store failure propagates; the caller must not fall back
    /// to an empty document when the store cannot be read.
    pub fn load_or_create(&self, document_id: DocumentId) -> Result<DocumentSession, SessionError> {
        let slot = self.slot(document_id);
        let mut guard = lock(&slot);
        if guard.is_none() {
            *guard = Some(self.load_session(document_id)?);
        }
        Ok(guard.as_ref().expect("slot filled above").clone())
    }

    /// Read-only inspection of a live session, if one exists.
    pub fn get(&self, document_id: &DocumentId) -> Option<DocumentSession> {
        let slot = lock(&self.sessions).get(document_id).cloned()?;
        let guard = lock(&slot);
        guard.clone()
    }

    /// Rebases `ops` against everything committed after each op's declared
    /// base version, applies them, and commits the batch, all under the
    /// document's slot mutex.
    ///
    /// An empty batch commits nothing and leaves the version unchanged. A
    /// stale op anywhere in the batch rejects the whole batch; no reader
    /// ever observes a partially applied one.
    pub fn submit(
        &self,
        document_id: DocumentId,
        ops: Vec<Operation>,
    ) -> Result<CommittedBatch, SessionError> {
        let slot = self.slot(document_id);
        let mut guard = lock(&slot);
        if guard.is_none() {
            *guard = Some(self.load_session(document_id)?);
        }
        let session = guard.as_mut().expect("slot filled above");

        if ops.is_empty() {
            return Ok(CommittedBatch {
                ops_applied: Vec::new(),
                new_version: session.version,
            });
        }

        // Staleness is decided for the whole batch before any state changes.
        let floor = session.history_floor();
        if let Some(stale) = ops.iter().find(|op| op.base_version < floor) {
            return Err(SessionError::StaleBaseVersion {
                base_version: stale.base_version,
                floor,
            });
        }

        let mut text = session.text.clone();
        let mut rebased = Vec::with_capacity(ops.len());
        for op in &ops {
            let log = session.ops_since(op.base_version);
            let rebased_op = transform::transform_op_against_log(op, &log);
            text = transform::apply_operation(&text, &rebased_op);
            rebased.push(rebased_op);
        }

        let new_version = session.version + 1;
        session.text = text;
        session.version = new_version;
        for op in &rebased {
            session.applied_ops_tail.push(CommittedOp {
                op: op.clone(),
                version: new_version,
            });
        }
        self.trim_tail(session);
        session.updated_at = Instant::now();
        tracing::debug!(
            document_id = %document_id,
            applied = rebased.len(),
            new_version,
            "batch committed"
        );

        Ok(CommittedBatch {
            ops_applied: rebased,
            new_version,
        })
    }

    /// Appends already-rebased operations to the tail and bumps the version.
    ///
    /// The caller is responsible for having applied `rebased_ops` to the
    /// text via [`SessionRegistry::set_text`]; [`SessionRegistry::submit`]
    /// does both atomically and is the path the protocol layer uses.
    pub fn commit(
        &self,
        document_id: DocumentId,
        rebased_ops: Vec<Operation>,
        new_version: Version,
    ) -> Result<(), SessionError> {
        let slot = self.slot(document_id);
        let mut guard = lock(&slot);
        if guard.is_none() {
            *guard = Some(self.load_session(document_id)?);
        }
        let session = guard.as_mut().expect("slot filled above");

        for op in rebased_ops {
            session.applied_ops_tail.push(CommittedOp {
                op,
                version: new_version,
            });
        }
        self.trim_tail(session);
        session.version = new_version;
        session.updated_at = Instant::now();
        Ok(())
    }

    /// Full replacement of the cached text, optionally moving the version.
    pub fn set_text(
        &self,
        document_id: DocumentId,
        text: String,
        new_version: Option<Version>,
    ) -> Result<(), SessionError> {
        let slot = self.slot(document_id);
        let mut guard = lock(&slot);
        if guard.is_none() {
            *guard = Some(self.load_session(document_id)?);
        }
        let session = guard.as_mut().expect("slot filled above");

        session.text = text;
        if let Some(version) = new_version {
            session.version = version;
        }
        session.updated_at = Instant::now();
        Ok(())
    }

    /// Ids of every live session, for the autosave scan.
    pub fn document_ids(&self) -> Vec<DocumentId> {
        lock(&self.sessions).keys().copied().collect()
    }

    /// Snapshot of a session that has unsaved changes older than
    /// `min_dirty_age`; `None` when the session is clean, still settling,
    /// or not loaded.
    pub fn dirty_snapshot(
        &self,
        document_id: &DocumentId,
        min_dirty_age: Duration,
        now: Instant,
    ) -> Option<SaveSnapshot> {
        let slot = lock(&self.sessions).get(document_id).cloned()?;
        let guard = lock(&slot);
        let session = guard.as_ref()?;
        if !session.is_dirty() || now.saturating_duration_since(session.updated_at) < min_dirty_age
        {
            return None;
        }
        Some(SaveSnapshot {
            text: session.text.clone(),
            version: session.version,
            updated_at: session.updated_at,
        })
    }

    /// Records a successful persistence of the state observed at `as_of`.
    /// Edits that raced the save keep the session dirty.
    pub fn mark_persisted(&self, document_id: &DocumentId, as_of: Instant) {
        let Some(slot) = lock(&self.sessions).get(document_id).cloned() else {
            return;
        };
        let mut guard = lock(&slot);
        if let Some(session) = guard.as_mut() {
            if session.last_persisted_at < as_of {
                session.last_persisted_at = as_of;
            }
        }
    }

    fn slot(&self, document_id: DocumentId) -> Slot {
        let mut sessions = lock(&self.sessions);
        sessions.entry(document_id).or_default().clone()
    }

    fn load_session(&self, document_id: DocumentId) -> Result<DocumentSession, SessionError> {
        let stored = self.store.load_content(&document_id)?;
        let now = Instant::now();
        let (text, version) = match stored {
            Some(content) => (content.text, content.version),
            None => (String::new(), 0),
        };
        tracing::debug!(document_id = %document_id, version, "session loaded");
        Ok(DocumentSession {
            document_id,
            text,
            version,
            applied_ops_tail: Vec::new(),
            loaded_at: now,
            updated_at: now,
            last_persisted_at: now,
        })
    }

    /// Bounds the tail without ever splitting a batch: `history_floor`
    /// promises that everything after the first retained version is
    /// present, so a partially trimmed batch is dropped whole.
    fn trim_tail(&self, session: &mut DocumentSession) {
        let limit = self.config.ops_tail_limit;
        if session.applied_ops_tail.len() <= limit {
            return;
        }
        let mut excess = session.applied_ops_tail.len() - limit;
        let boundary = session.applied_ops_tail[excess - 1].version;
        while session
            .applied_ops_tail
            .get(excess)
            .is_some_and(|committed| committed.version == boundary)
        {
            excess += 1;
        }
        session.applied_ops_tail.drain(..excess);
    }
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codoc_core::EditKind;
    use codoc_storage::MemoryStore;
    use uuid::Uuid;

    fn insert(user: &str, base_version: u64, position: usize, text: &str) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            user_id: user.to_string(),
            client_id: None,
            base_version,
            edit: EditKind::Insert {
                position,
                text: text.to_string(),
            },
        }
    }

    fn registry() -> (Arc<MemoryStore>, SessionRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(store.clone());
        (store, registry)
    }

    #[test]
    fn test_load_or_create_defaults_to_empty() {
        let (_, registry) = registry();
        let id = Uuid::new_v4();
        let session = registry.load_or_create(id).unwrap();
        assert_eq!(session.text, "");
        assert_eq!(session.version, 0);
    }

    #[test]
    fn test_load_or_create_uses_persisted_content() {
        let (store, registry) = registry();
        let id = Uuid::new_v4();
        store.seed(id, "persisted", 12);
        let session = registry.load_or_create(id).unwrap();
        assert_eq!(session.text, "persisted");
        assert_eq!(session.version, 12);
    }

    #[test]
    fn test_version_monotonicity_over_commits() {
        let (_, registry) = registry();
        let id = Uuid::new_v4();

        let mut expected = String::new();
        for n in 0..5u64 {
            let op = insert("alice", n, expected.chars().count(), "ab");
            expected.push_str("ab");
            let batch = registry.submit(id, vec![op]).unwrap();
            assert_eq!(batch.new_version, n + 1);
        }

        let session = registry.get(&id).unwrap();
        assert_eq!(session.version, 5);
        assert_eq!(session.text, expected);
    }

    #[test]
    fn test_empty_batch_leaves_version_unchanged() {
        let (_, registry) = registry();
        let id = Uuid::new_v4();
        registry.submit(id, vec![insert("alice", 0, 0, "hi")]).unwrap();

        let batch = registry.submit(id, Vec::new()).unwrap();
        assert_eq!(batch.new_version, 1);
        assert!(batch.ops_applied.is_empty());
        assert_eq!(registry.get(&id).unwrap().version, 1);
    }

    #[test]
    fn test_submit_rebases_against_tail() {
        let (_, registry) = registry();
        let id = Uuid::new_v4();

        registry.submit(id, vec![insert("alice", 0, 0, "hello")]).unwrap();
        // Bob never saw alice's insert; his insert at 0 is based on version 0.
        let batch = registry.submit(id, vec![insert("bob", 0, 0, "X")]).unwrap();

        assert_eq!(batch.new_version, 2);
        // "bob" sorts after "alice", so the tie-break shifts his insert right.
        assert_eq!(registry.get(&id).unwrap().text, "helloX");
    }

    #[test]
    fn test_stale_base_version_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::with_config(
            store,
            SessionConfig { ops_tail_limit: 2 },
        );
        let id = Uuid::new_v4();

        for n in 0..4u64 {
            registry.submit(id, vec![insert("alice", n, 0, "x")]).unwrap();
        }

        // Tail now covers versions 3..=4; base version 0 is unreachable.
        let err = registry.submit(id, vec![insert("bob", 0, 0, "y")]).unwrap_err();
        match err {
            SessionError::StaleBaseVersion { base_version: 0, .. } => {}
            other => panic!("Expected StaleBaseVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_tail_is_bounded() {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::with_config(
            store,
            SessionConfig { ops_tail_limit: 3 },
        );
        let id = Uuid::new_v4();

        for n in 0..10u64 {
            registry.submit(id, vec![insert("alice", n, 0, "x")]).unwrap();
        }

        let session = registry.get(&id).unwrap();
        assert_eq!(session.applied_ops_tail.len(), 3);
        assert_eq!(session.applied_ops_tail[0].version, 8);
        assert_eq!(session.history_floor(), 7);
    }

    #[test]
    fn test_stale_op_mid_batch_leaves_session_untouched() {
        let (store, registry) = registry();
        let id = Uuid::new_v4();
        store.seed(id, "base", 12);
        registry.load_or_create(id).unwrap();

        // First op is current, second is far behind the floor.
        let batch = vec![insert("alice", 12, 0, "XX"), insert("alice", 5, 0, "YY")];
        let err = registry.submit(id, batch).unwrap_err();
        match err {
            SessionError::StaleBaseVersion { base_version: 5, .. } => {}
            other => panic!("Expected StaleBaseVersion, got {other:?}"),
        }

        // The rejected batch published nothing.
        let session = registry.get(&id).unwrap();
        assert_eq!(session.text, "base");
        assert_eq!(session.version, 12);
        assert!(session.applied_ops_tail.is_empty());
    }

    #[test]
    fn test_trim_never_splits_a_batch() {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::with_config(
            store,
            SessionConfig { ops_tail_limit: 3 },
        );
        let id = Uuid::new_v4();

        registry
            .submit(id, vec![insert("alice", 0, 0, "a"), insert("alice", 0, 1, "b")])
            .unwrap();
        registry
            .submit(id, vec![insert("alice", 1, 2, "c"), insert("alice", 1, 3, "d")])
            .unwrap();

        // Keeping three of the four entries would cut the first batch in
        // half; the whole batch goes instead.
        let session = registry.get(&id).unwrap();
        assert_eq!(session.text, "abcd");
        assert_eq!(session.applied_ops_tail.len(), 2);
        assert!(session.applied_ops_tail.iter().all(|c| c.version == 2));
        assert_eq!(session.history_floor(), 1);
    }

    #[test]
    fn test_rebase_from_before_trimmed_batch_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::with_config(
            store,
            SessionConfig { ops_tail_limit: 2 },
        );
        let id = Uuid::new_v4();

        // One batch of three inserts; a two-entry tail cannot hold it.
        registry
            .submit(
                id,
                vec![
                    insert("alice", 0, 0, "A"),
                    insert("alice", 0, 1, "B"),
                    insert("alice", 0, 2, "C"),
                ],
            )
            .unwrap();

        let session = registry.get(&id).unwrap();
        assert_eq!(session.text, "ABC");
        assert!(session.applied_ops_tail.is_empty());
        assert_eq!(session.history_floor(), 1);

        // Rebasing from version 0 would need the dropped entries; it must
        // fail rather than rebase against a partial log.
        let err = registry.submit(id, vec![insert("zed", 0, 0, "Z")]).unwrap_err();
        match err {
            SessionError::StaleBaseVersion { base_version: 0, floor: 1 } => {}
            other => panic!("Expected StaleBaseVersion, got {other:?}"),
        }

        // A client at the current version still proceeds.
        let batch = registry.submit(id, vec![insert("zed", 1, 3, "Z")]).unwrap();
        assert_eq!(batch.new_version, 2);
        assert_eq!(registry.get(&id).unwrap().text, "ABCZ");
    }

    #[test]
    fn test_set_text_and_commit_primitives() {
        let (_, registry) = registry();
        let id = Uuid::new_v4();
        registry.load_or_create(id).unwrap();

        let op = insert("alice", 0, 0, "manual");
        registry.set_text(id, "manual".to_string(), None).unwrap();
        registry.commit(id, vec![op], 1).unwrap();

        let session = registry.get(&id).unwrap();
        assert_eq!(session.text, "manual");
        assert_eq!(session.version, 1);
        assert_eq!(session.applied_ops_tail.len(), 1);
    }

    #[test]
    fn test_get_absent_session() {
        let (_, registry) = registry();
        assert!(registry.get(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_concurrent_load_or_create_converges() {
        let (store, registry) = registry();
        let registry = Arc::new(registry);
        let id = Uuid::new_v4();
        store.seed(id, "seeded", 3);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.load_or_create(id).unwrap().version)
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 3);
        }

        // Exactly one slot exists for the document.
        assert_eq!(registry.document_ids(), vec![id]);
    }

    #[test]
    fn test_concurrent_submits_serialize_per_document() {
        let (_, registry) = registry();
        let registry = Arc::new(registry);
        let id = Uuid::new_v4();
        registry.load_or_create(id).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let version = registry.get(&id).unwrap().version;
                        let op = insert(&format!("user-{worker}"), version, 0, "x");
                        registry.submit(id, vec![op]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let session = registry.get(&id).unwrap();
        assert_eq!(session.version, 100);
        assert_eq!(session.text.len(), 100);
    }
}
