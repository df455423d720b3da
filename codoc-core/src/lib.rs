//! Operation model and transform engine for collaborative text editing.
//!
//! This crate provides the wire-level representation of edits and the pure
//! functions that rebase concurrent edits against each other:
//!
//! - [`RawOperation`] - the wire shape of an edit, validated at the boundary
//! - [`Operation`] and [`EditKind`] - the closed, validated edit model
//! - [`transform`] - pure transform and apply functions
//!
//! Nothing in this crate holds state; every function is safe to call from any
//! tier that needs to preview or rebase edits.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod transform;

/// Globally unique, client-generated operation identifier.
pub type OpId = Uuid;

/// Identifier of a collaboratively edited document.
pub type DocumentId = Uuid;

/// Identifier of the authoring user, issued by the access-control layer.
pub type UserId = String;

/// Monotonically non-decreasing document version counter.
pub type Version = u64;

/// An edit as it arrives on the wire, before validation.
///
/// `position` and `delete_length` are signed here so that a hostile or buggy
/// client sending negative numbers is caught by [`RawOperation::validate`]
/// instead of wrapping silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOperation {
    pub id: OpId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub base_version: Version,
    pub kind: String,
    pub position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_length: Option<i64>,
}

/// A validated, immutable edit. Serializes as the flat wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RawOperation", try_from = "RawOperation")]
pub struct Operation {
    pub id: OpId,
    pub user_id: UserId,
    pub client_id: Option<String>,
    pub base_version: Version,
    pub edit: EditKind,
}

/// The closed set of edit kinds. Anything else is rejected at the boundary.
///
/// Positions and lengths are in Unicode scalar values (chars), not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditKind {
    Insert { position: usize, text: String },
    Delete { position: usize, length: usize },
}

/// Why an incoming operation was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    UnknownKind,
    NegativePosition,
    MissingInsertText,
    MissingDeleteLength,
    NonPositiveDeleteLength,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed operation {op_id}: {kind:?}")]
pub struct MalformedOperation {
    pub op_id: OpId,
    pub kind: MalformedKind,
}

impl RawOperation {
    /// Validates the wire shape into the closed edit model.
    ///
    /// Malformed operations must never reach the transform engine; callers
    /// drop them from their batch and report a client error.
    pub fn validate(self) -> Result<Operation, MalformedOperation> {
        let op_id = self.id;
        let malformed = move |kind| MalformedOperation { op_id, kind };

        if self.position < 0 {
            return Err(malformed(MalformedKind::NegativePosition));
        }
        let position = self.position as usize;

        let edit = match self.kind.as_str() {
            "insert" => match self.inserted_text {
                Some(text) => EditKind::Insert { position, text },
                None => return Err(malformed(MalformedKind::MissingInsertText)),
            },
            "delete" => match self.delete_length {
                Some(length) if length > 0 => EditKind::Delete {
                    position,
                    length: length as usize,
                },
                Some(_) => return Err(malformed(MalformedKind::NonPositiveDeleteLength)),
                None => return Err(malformed(MalformedKind::MissingDeleteLength)),
            },
            _ => return Err(malformed(MalformedKind::UnknownKind)),
        };

        Ok(Operation {
            id: self.id,
            user_id: self.user_id,
            client_id: self.client_id,
            base_version: self.base_version,
            edit,
        })
    }
}

impl TryFrom<RawOperation> for Operation {
    type Error = MalformedOperation;

    fn try_from(raw: RawOperation) -> Result<Self, Self::Error> {
        raw.validate()
    }
}

impl From<Operation> for RawOperation {
    fn from(op: Operation) -> Self {
        let (kind, position, inserted_text, delete_length) = match op.edit {
            EditKind::Insert { position, text } => ("insert", position, Some(text), None),
            EditKind::Delete { position, length } => {
                ("delete", position, None, Some(length as i64))
            }
        };
        RawOperation {
            id: op.id,
            user_id: op.user_id,
            client_id: op.client_id,
            base_version: op.base_version,
            kind: kind.to_string(),
            position: position as i64,
            inserted_text,
            delete_length,
        }
    }
}

impl Operation {
    /// Position the edit targets, in chars of the text it was based on.
    pub fn position(&self) -> usize {
        match &self.edit {
            EditKind::Insert { position, .. } | EditKind::Delete { position, .. } => *position,
        }
    }
}
