//! Pure operational-transformation functions.
//!
//! Everything here is stateless and total: hostile positions and lengths are
//! clamped, never rejected, so a lagging client can at worst produce a
//! degraded edit, not a panic or a corrupted document.

use crate::{EditKind, Operation};

/// Inserts `inserted` at char position `position`, clamped to the text length.
pub fn apply_insert(text: &str, position: usize, inserted: &str) -> String {
    if inserted.is_empty() {
        return text.to_string();
    }
    let at = byte_offset(text, position);
    let mut out = String::with_capacity(text.len() + inserted.len());
    out.push_str(&text[..at]);
    out.push_str(inserted);
    out.push_str(&text[at..]);
    out
}

/// Deletes up to `length` chars starting at `position`, with both the start
/// and the window clamped to the text bounds.
pub fn apply_delete(text: &str, position: usize, length: usize) -> String {
    let total = char_len(text);
    let start = position.min(total);
    let end = start.saturating_add(length).min(total);
    if end <= start {
        return text.to_string();
    }
    let start_b = byte_offset(text, start);
    let end_b = byte_offset(text, end);
    let mut out = String::with_capacity(text.len() - (end_b - start_b));
    out.push_str(&text[..start_b]);
    out.push_str(&text[end_b..]);
    out
}

/// Applies a single validated operation.
pub fn apply_operation(text: &str, op: &Operation) -> String {
    match &op.edit {
        EditKind::Insert { position, text: inserted } => apply_insert(text, *position, inserted),
        EditKind::Delete { position, length } => apply_delete(text, *position, *length),
    }
}

/// Left-to-right sequential application.
pub fn apply_operations(text: &str, ops: &[Operation]) -> String {
    ops.iter()
        .fold(text.to_string(), |acc, op| apply_operation(&acc, op))
}

/// Rebases `op` so it still expresses the author's intent after `other` has
/// already been applied to the text. Self-pairs are returned unchanged.
pub fn transform_against(op: &Operation, other: &Operation) -> Operation {
    if op.id == other.id {
        return op.clone();
    }
    let edit = match (&op.edit, &other.edit) {
        (EditKind::Insert { position, text }, EditKind::Insert { position: other_pos, text: other_text }) => {
            let shift = char_len(other_text);
            let shifted = *other_pos < *position
                || (*other_pos == *position && sorts_after(op, other));
            EditKind::Insert {
                position: if shifted { position + shift } else { *position },
                text: text.clone(),
            }
        }
        (EditKind::Insert { position, text }, EditKind::Delete { position: other_pos, length: other_len }) => {
            let position = if *position <= *other_pos {
                *position
            } else if *position >= other_pos + other_len {
                position - other_len
            } else {
                // The insertion target was deleted; land at the start of the gap.
                *other_pos
            };
            EditKind::Insert {
                position,
                text: text.clone(),
            }
        }
        (EditKind::Delete { position, length }, EditKind::Insert { position: other_pos, text: other_text }) => {
            let shift = char_len(other_text);
            if *other_pos <= *position {
                EditKind::Delete {
                    position: position + shift,
                    length: *length,
                }
            } else if *other_pos >= position + length {
                EditKind::Delete {
                    position: *position,
                    length: *length,
                }
            } else {
                // Text inserted inside the window is swallowed by the delete.
                EditKind::Delete {
                    position: *position,
                    length: length + shift,
                }
            }
        }
        (EditKind::Delete { position, length }, EditKind::Delete { position: other_pos, length: other_len }) => {
            let start = *position;
            let end = position + length;
            let other_start = *other_pos;
            let other_end = other_pos + other_len;
            let overlap = end.min(other_end).saturating_sub(start.max(other_start));
            let position = if start >= other_end {
                start - other_len
            } else {
                start.min(other_start)
            };
            EditKind::Delete {
                position,
                length: length.saturating_sub(overlap),
            }
        }
    };
    Operation {
        edit,
        ..op.clone()
    }
}

/// Rebases one incoming operation through the applied log in commit order.
pub fn transform_op_against_log(op: &Operation, applied: &[Operation]) -> Operation {
    applied
        .iter()
        .filter(|other| other.id != op.id)
        .fold(op.clone(), |acc, other| transform_against(&acc, other))
}

/// Rebases a whole incoming batch. Inputs are never mutated; ops from the
/// same batch are not transformed against each other (the author already
/// accounted for them when generating the batch).
pub fn transform_ops_against_log(incoming: &[Operation], applied: &[Operation]) -> Vec<Operation> {
    incoming
        .iter()
        .map(|op| transform_op_against_log(op, applied))
        .collect()
}

/// Deterministic tie-break for equal insert positions: compare by
/// `(user_id, id)` ascending; the operation that sorts later is shifted
/// right, so every replica picks the same interleaving.
fn sorts_after(op: &Operation, other: &Operation) -> bool {
    (&op.user_id, &op.id) > (&other.user_id, &other.id)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn byte_offset(text: &str, position: usize) -> usize {
    text.char_indices()
        .nth(position)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}
