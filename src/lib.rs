//! codoc: real-time text synchronization for collaborative document editing.
//!
//! Multiple clients edit the same document concurrently; codoc converges all
//! replicas to an identical final text deterministically and persists
//! progress durably without blocking editors. It includes:
//!
//! - **Operation model** - wire-level edits validated into a closed insert/delete union
//! - **Transform engine** - pure operational-transformation and apply functions
//! - **Session registry** - per-document in-memory state with serialized commits
//! - **Autosave scheduler** - debounced, guarded flushing to the persistent store
//! - **Sync protocol** - the join/submit/broadcast event contract for transports
//!
//! # Quick Start
//!
//! ```rust
//! use codoc::{CollabServer, MemoryStore, SessionRegistry};
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! let store = Arc::new(MemoryStore::new());
//! let registry = Arc::new(SessionRegistry::new(store));
//! let server = CollabServer::new(registry);
//!
//! let document = Uuid::new_v4();
//! let connection = Uuid::new_v4();
//! let outcome = server.join(connection, "alice".to_string(), document).unwrap();
//! assert_eq!(outcome.initial_state.version, 0);
//! ```

// Operation model and transform engine
pub use codoc_core::{
    DocumentId, EditKind, MalformedKind, MalformedOperation, OpId, Operation, RawOperation,
    UserId, Version, transform,
};

// Session registry and autosave scheduler
pub use codoc_session::{
    AutosaveConfig, AutosaveHandle, Autosaver, CommittedBatch, CommittedOp, DocumentSession,
    SaveSnapshot, SessionConfig, SessionError, SessionRegistry, TickReport,
};

// Persistent store boundary
pub use codoc_storage::{DocumentStore, FileStore, MemoryStore, StorageError, StoredContent};

// Synchronization protocol
pub use codoc_sync::{
    ClientEvent, CollabServer, ConnectionId, DocError, InitialState, JoinOutcome, OpsCommitted,
    Outbound, PresenceUpdate, ServerEvent, SyncError, Target,
};
