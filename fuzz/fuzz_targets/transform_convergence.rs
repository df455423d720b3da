#![no_main]

//! Fuzz target for the transform engine.
//!
//! Random operation batches are pushed through the rebase-and-apply pipeline
//! in several arrival orders. Two properties are checked: the pipeline is
//! total (hostile positions and lengths never panic), and concurrent insert
//! batches converge to the same text in every arrival order.

use codoc_core::transform::{apply_operation, transform_op_against_log};
use codoc_core::{EditKind, Operation};
use libfuzzer_sys::fuzz_target;
use uuid::Uuid;

const BASE: &str = "the quick brown fox";

fn parse_ops(data: &[u8]) -> Vec<Operation> {
    let users = ["alice", "bob", "carol", "dave"];
    let mut ops = Vec::new();
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let user = users[(chunk[1] % 4) as usize];
        let edit = if chunk[0] % 2 == 0 {
            // Convergence only holds for positions that exist in the base;
            // out-of-range inserts clamp, which is a degraded edit.
            EditKind::Insert {
                position: chunk[2] as usize % (BASE.chars().count() + 1),
                text: format!("{:x}", chunk[3]),
            }
        } else {
            EditKind::Delete {
                position: chunk[2] as usize,
                length: (chunk[3] % 8) as usize + 1,
            }
        };
        // Deterministic ids keep the tie-break stable across orders.
        let seed = ((chunk[0] as u128) << 24
            | (chunk[1] as u128) << 16
            | (chunk[2] as u128) << 8
            | chunk[3] as u128)
            | (ops.len() as u128) << 32;
        ops.push(Operation {
            id: Uuid::from_u128(seed),
            user_id: user.to_string(),
            client_id: None,
            base_version: 0,
            edit,
        });
    }
    ops
}

/// Server-side commit loop: each arriving op is rebased against everything
/// already committed, then applied.
fn commit_all(base: &str, ops: &[Operation]) -> String {
    let mut text = base.to_string();
    let mut committed: Vec<Operation> = Vec::new();
    for op in ops {
        let rebased = transform_op_against_log(op, &committed);
        text = apply_operation(&text, &rebased);
        committed.push(rebased);
    }
    text
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let ops = parse_ops(data);
    if ops.len() < 2 {
        return;
    }

    // Totality: arbitrary insert/delete mixes must never panic, and the
    // text can only grow by what the inserts carry.
    let forward = commit_all(BASE, &ops);
    let inserted: usize = ops
        .iter()
        .map(|op| match &op.edit {
            EditKind::Insert { text, .. } => text.chars().count(),
            EditKind::Delete { .. } => 0,
        })
        .sum();
    assert!(forward.chars().count() <= BASE.chars().count() + inserted);

    // Convergence: insert-only batches reach the same text in any order.
    if ops
        .iter()
        .all(|op| matches!(op.edit, EditKind::Insert { .. }))
    {
        let reversed: Vec<Operation> = ops.iter().rev().cloned().collect();
        assert_eq!(forward, commit_all(BASE, &reversed), "reverse order diverged");

        let mut rotated = ops.clone();
        rotated.rotate_left(ops.len() / 2);
        assert_eq!(forward, commit_all(BASE, &rotated), "rotated order diverged");
    }
});
