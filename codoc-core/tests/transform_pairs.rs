use codoc_core::transform::{
    apply_delete, apply_insert, apply_operation, apply_operations, transform_against,
    transform_ops_against_log,
};
use codoc_core::{EditKind, Operation};
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

fn delete(user: &str, base_version: u64, position: usize, length: usize) -> Operation {
    Operation {
        id: Uuid::new_v4(),
        user_id: user.to_string(),
        client_id: None,
        base_version,
        edit: EditKind::Delete { position, length },
    }
}

#[test]
fn test_apply_insert_clamps_position() {
    assert_eq!(apply_insert("abc", 99, "X"), "abcX");
    assert_eq!(apply_insert("abc", 0, "X"), "Xabc");
    assert_eq!(apply_insert("", 5, "X"), "X");
}

#[test]
fn test_apply_insert_empty_is_noop() {
    for pos in 0..5 {
        assert_eq!(apply_insert("abc", pos, ""), "abc");
    }
}

#[test]
fn test_apply_delete_clamps_window() {
    assert_eq!(apply_delete("abc", 1, 99), "a");
    assert_eq!(apply_delete("abc", 99, 1), "abc");
    assert_eq!(apply_delete("abc", 0, 3), "");
}

#[test]
fn test_apply_delete_zero_length_is_noop() {
    for pos in 0..5 {
        assert_eq!(apply_delete("abc", pos, 0), "abc");
    }
}

#[test]
fn test_apply_respects_char_boundaries() {
    assert_eq!(apply_insert("héllo", 2, "x"), "héxllo");
    assert_eq!(apply_delete("héllo", 1, 2), "hlo");
}

#[test]
fn test_insert_insert_shifts_right_of_earlier_insert() {
    let op = insert("b", 0, 4, "YY");
    let other = insert("a", 0, 1, "XXX");
    let rebased = transform_against(&op, &other);
    assert_eq!(
        rebased.edit,
        EditKind::Insert {
            position: 7,
            text: "YY".to_string()
        }
    );
}

#[test]
fn test_insert_insert_tie_break_is_deterministic() {
    let a = insert("a", 0, 2, "A");
    let b = insert("b", 0, 2, "B");

    // Commit order a then b.
    let text_ab = {
        let after_a = apply_operation("0123", &a);
        apply_operation(&after_a, &transform_against(&b, &a))
    };
    // Commit order b then a.
    let text_ba = {
        let after_b = apply_operation("0123", &b);
        apply_operation(&after_b, &transform_against(&a, &b))
    };

    assert_eq!(text_ab, text_ba);
    assert_eq!(text_ab, "01AB23");
}

#[test]
fn test_insert_unchanged_left_of_delete() {
    let op = insert("a", 0, 1, "X");
    let other = delete("b", 0, 3, 2);
    assert_eq!(transform_against(&op, &other).position(), 1);
}

#[test]
fn test_insert_shifts_left_past_delete() {
    let op = insert("a", 0, 6, "X");
    let other = delete("b", 0, 1, 3);
    assert_eq!(transform_against(&op, &other).position(), 3);
}

#[test]
fn test_insert_inside_delete_lands_at_gap_start() {
    let op = insert("a", 0, 4, "X");
    let other = delete("b", 0, 2, 5);
    assert_eq!(transform_against(&op, &other).position(), 2);
}

#[test]
fn test_delete_shifts_right_of_insert() {
    let op = delete("a", 0, 3, 2);
    let other = insert("b", 0, 1, "XY");
    assert_eq!(
        transform_against(&op, &other).edit,
        EditKind::Delete {
            position: 5,
            length: 2
        }
    );
}

#[test]
fn test_delete_swallows_insert_inside_window() {
    let op = delete("a", 0, 1, 3);
    let other = insert("b", 0, 2, "XY");
    assert_eq!(
        transform_against(&op, &other).edit,
        EditKind::Delete {
            position: 1,
            length: 5
        }
    );
}

#[test]
fn test_delete_unchanged_when_insert_at_window_end() {
    let op = delete("a", 0, 1, 2);
    let other = insert("b", 0, 3, "XY");
    assert_eq!(
        transform_against(&op, &other).edit,
        EditKind::Delete {
            position: 1,
            length: 2
        }
    );
}

#[test]
fn test_delete_delete_overlap_deletes_union() {
    // op1 deletes [2,7) ("llo w"), op2 (already applied) deletes [0,4) ("hell").
    let base = "hello world";
    let op1 = delete("a", 0, 2, 5);
    let op2 = delete("b", 0, 0, 4);

    let after_op2 = apply_operation(base, &op2);
    let rebased = transform_against(&op1, &op2);
    let result = apply_operation(&after_op2, &rebased);

    // Reapplying in commit order equals deleting the union [0,7).
    assert_eq!(result, apply_delete(base, 0, 7));
    assert_eq!(result, "orld");
}

#[test]
fn test_delete_delete_disjoint_shifts_left() {
    // other deletes [0,1); op deletes [4,6) of "abcdef".
    let op = delete("a", 0, 4, 2);
    let other = delete("b", 0, 0, 1);
    let rebased = transform_against(&op, &other);
    assert_eq!(
        rebased.edit,
        EditKind::Delete {
            position: 3,
            length: 2
        }
    );
    let after_other = apply_operation("abcdef", &other);
    assert_eq!(apply_operation(&after_other, &rebased), "bcd");
}

#[test]
fn test_delete_fully_covered_becomes_noop() {
    let op = delete("a", 0, 2, 2);
    let other = delete("b", 0, 0, 6);
    let rebased = transform_against(&op, &other);
    assert_eq!(
        rebased.edit,
        EditKind::Delete {
            position: 0,
            length: 0
        }
    );
}

#[test]
fn test_transform_skips_self_pair() {
    let op = insert("a", 0, 2, "X");
    let rebased = transform_op_self_pair(&op);
    assert_eq!(rebased, op);
}

fn transform_op_self_pair(op: &Operation) -> Operation {
    transform_ops_against_log(std::slice::from_ref(op), std::slice::from_ref(op))
        .pop()
        .expect("one op in, one op out")
}

#[test]
fn test_transform_log_folds_in_commit_order() {
    // Base "abcdef": two committed inserts, then rebase a delete of [2,4).
    let applied = vec![insert("a", 0, 0, "1"), insert("a", 1, 1, "2")];
    let incoming = delete("b", 0, 2, 2);

    let rebased = transform_ops_against_log(std::slice::from_ref(&incoming), &applied);
    assert_eq!(
        rebased[0].edit,
        EditKind::Delete {
            position: 4,
            length: 2
        }
    );

    let text = apply_operations("abcdef", &applied);
    assert_eq!(apply_operation(&text, &rebased[0]), "12abef");
}

#[test]
fn test_transform_does_not_mutate_inputs() {
    let incoming = vec![insert("a", 0, 3, "X")];
    let applied = vec![delete("b", 0, 0, 2)];
    let incoming_before = incoming.clone();
    let applied_before = applied.clone();

    let _ = transform_ops_against_log(&incoming, &applied);

    assert_eq!(incoming, incoming_before);
    assert_eq!(applied, applied_before);
}
