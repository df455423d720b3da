//! Synchronization protocol between client connections and document sessions.
//!
//! The protocol is a closed event vocabulary: clients send [`ClientEvent`]s,
//! the server answers with [`ServerEvent`]s addressed either to a single
//! connection or to every member of a document's room. [`CollabServer`] is
//! the hub that rooms connections, validates incoming batches, rebases them
//! through the session registry, and produces the outbound envelopes.
//!
//! The transport (sockets, message framing, authentication) lives outside
//! this crate; it is assumed reliable and ordered per connection, and to have
//! authorized the user for a document before calling [`CollabServer::join`].

use codoc_core::{DocumentId, Operation, RawOperation, UserId, Version};
use codoc_session::{CommittedOp, SessionError, SessionRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Identifier the transport assigns to one client connection.
pub type ConnectionId = Uuid;

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Join { document_id: DocumentId },
    #[serde(rename_all = "camelCase")]
    SubmitOps {
        document_id: DocumentId,
        ops: Vec<RawOperation>,
    },
    #[serde(rename_all = "camelCase")]
    Leave { document_id: DocumentId },
}

/// Answer to a successful join: the full current state of the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialState {
    pub document_id: DocumentId,
    pub text: String,
    pub version: Version,
    pub ops_log_tail: Vec<CommittedOp>,
    pub active_users: Vec<UserId>,
}

/// Broadcast to every room member (including the sender) after a commit, so
/// all replicas apply the same rebased truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpsCommitted {
    pub document_id: DocumentId,
    pub ops_applied: Vec<Operation>,
    pub new_version: Version,
    pub from_user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub document_id: DocumentId,
    pub active_users: Vec<UserId>,
}

/// Sent to a single connection on access denial or protocol violation;
/// never broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocError {
    pub message: String,
}

/// Events the server may emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    InitialState(InitialState),
    OpsCommitted(OpsCommitted),
    PresenceUpdate(PresenceUpdate),
    DocError(DocError),
}

/// Where the transport should deliver an outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Connection(ConnectionId),
    Room(DocumentId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub event: ServerEvent,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("connection has not joined this document")]
    NotJoined,
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl SyncError {
    pub fn to_doc_error(&self) -> DocError {
        DocError {
            message: self.to_string(),
        }
    }
}

/// What a successful join produces: state for the joining connection and a
/// presence update for the whole room.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub initial_state: InitialState,
    pub presence: PresenceUpdate,
}

#[derive(Debug, Default)]
struct Room {
    members: BTreeMap<ConnectionId, UserId>,
}

impl Room {
    fn active_users(&self) -> Vec<UserId> {
        self.members
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// The collaboration hub: one per process, owning room membership and
/// driving the session registry.
pub struct CollabServer {
    registry: Arc<SessionRegistry>,
    rooms: Mutex<HashMap<DocumentId, Room>>,
}

impl CollabServer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Adds the connection to the document's room, loading the session on
    /// first access. A load failure propagates; the caller reports it back
    /// as a join error instead of defaulting to an empty document.
    pub fn join(
        &self,
        connection: ConnectionId,
        user_id: UserId,
        document_id: DocumentId,
    ) -> Result<JoinOutcome, SyncError> {
        let session = self.registry.load_or_create(document_id)?;

        let mut rooms = lock(&self.rooms);
        let room = rooms.entry(document_id).or_default();
        room.members.insert(connection, user_id);
        let active_users = room.active_users();
        tracing::debug!(
            document_id = %document_id,
            connection = %connection,
            members = room.members.len(),
            "connection joined"
        );

        Ok(JoinOutcome {
            initial_state: InitialState {
                document_id,
                text: session.text,
                version: session.version,
                ops_log_tail: session.applied_ops_tail,
                active_users: active_users.clone(),
            },
            presence: PresenceUpdate {
                document_id,
                active_users,
            },
        })
    }

    /// Validates, rebases and commits a batch from a joined connection.
    ///
    /// Malformed operations are dropped from the batch with a warning; a
    /// batch left empty still answers with the current version so the
    /// sender learns it was absorbed.
    pub fn submit_ops(
        &self,
        connection: ConnectionId,
        document_id: DocumentId,
        ops: Vec<RawOperation>,
    ) -> Result<OpsCommitted, SyncError> {
        let from_user_id = {
            let rooms = lock(&self.rooms);
            rooms
                .get(&document_id)
                .and_then(|room| room.members.get(&connection))
                .cloned()
                .ok_or(SyncError::NotJoined)?
        };

        let mut valid = Vec::with_capacity(ops.len());
        for raw in ops {
            match raw.validate() {
                Ok(op) => valid.push(op),
                Err(err) => {
                    // A single bad op from a stale client must not break
                    // the session; drop it and keep the rest of the batch.
                    tracing::warn!(
                        document_id = %document_id,
                        op_id = %err.op_id,
                        reason = ?err.kind,
                        "dropping malformed operation"
                    );
                }
            }
        }

        let batch = self.registry.submit(document_id, valid)?;
        Ok(OpsCommitted {
            document_id,
            ops_applied: batch.ops_applied,
            new_version: batch.new_version,
            from_user_id,
        })
    }

    /// Removes the connection from one room. Returns the presence update to
    /// broadcast, or `None` if the connection was not a member.
    pub fn leave(
        &self,
        connection: ConnectionId,
        document_id: DocumentId,
    ) -> Option<PresenceUpdate> {
        let mut rooms = lock(&self.rooms);
        let room = rooms.get_mut(&document_id)?;
        room.members.remove(&connection)?;
        let active_users = room.active_users();
        if room.members.is_empty() {
            rooms.remove(&document_id);
        }
        Some(PresenceUpdate {
            document_id,
            active_users,
        })
    }

    /// Removes a disconnected connection from every room it had joined.
    /// Document state is untouched; only presence changes.
    pub fn disconnect(&self, connection: ConnectionId) -> Vec<PresenceUpdate> {
        let mut rooms = lock(&self.rooms);
        let mut updates = Vec::new();
        rooms.retain(|document_id, room| {
            if room.members.remove(&connection).is_some() {
                updates.push(PresenceUpdate {
                    document_id: *document_id,
                    active_users: room.active_users(),
                });
            }
            !room.members.is_empty()
        });
        updates
    }

    /// Users currently present in a document's room.
    pub fn active_users(&self, document_id: &DocumentId) -> Vec<UserId> {
        let rooms = lock(&self.rooms);
        rooms
            .get(document_id)
            .map(|room| room.active_users())
            .unwrap_or_default()
    }

    /// Single transport entry point: dispatches a client event and returns
    /// the envelopes to deliver. Errors become a `docError` addressed only
    /// to the offending connection.
    pub fn handle_event(
        &self,
        connection: ConnectionId,
        user_id: &UserId,
        event: ClientEvent,
    ) -> Vec<Outbound> {
        match event {
            ClientEvent::Join { document_id } => {
                match self.join(connection, user_id.clone(), document_id) {
                    Ok(outcome) => vec![
                        Outbound {
                            target: Target::Connection(connection),
                            event: ServerEvent::InitialState(outcome.initial_state),
                        },
                        Outbound {
                            target: Target::Room(document_id),
                            event: ServerEvent::PresenceUpdate(outcome.presence),
                        },
                    ],
                    Err(err) => vec![doc_error(connection, &err)],
                }
            }
            ClientEvent::SubmitOps { document_id, ops } => {
                match self.submit_ops(connection, document_id, ops) {
                    Ok(committed) => vec![Outbound {
                        target: Target::Room(document_id),
                        event: ServerEvent::OpsCommitted(committed),
                    }],
                    Err(err) => vec![doc_error(connection, &err)],
                }
            }
            ClientEvent::Leave { document_id } => self
                .leave(connection, document_id)
                .map(|presence| Outbound {
                    target: Target::Room(document_id),
                    event: ServerEvent::PresenceUpdate(presence),
                })
                .into_iter()
                .collect(),
        }
    }
}

fn doc_error(connection: ConnectionId, err: &SyncError) -> Outbound {
    Outbound {
        target: Target::Connection(connection),
        event: ServerEvent::DocError(err.to_doc_error()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
