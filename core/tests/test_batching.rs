//! Batched full-history inference: output order, no-op substitution,
//! distribution validity and dropout behaviour.


use incremental_policy_core::observation::{ObservationRecord, ReadPointer};
use incremental_policy_core::{InferenceMode, PolicyConfig, PolicyConstants, IncrementalPolicyModel};
use policy_test_utils::*;

// ── Helpers ──────────────────────────────────────────────────────────

/// Records with instruction lengths deliberately out of sorted order.
fn mixed_records(model: &IncrementalPolicyModel) -> Vec<ObservationRecord> {
    let mut out = Vec::new();
    out.extend(episode_records(model, vec![1, 2], ReadPointer::whole(2), 3, 100));
    out.extend(episode_records(model, vec![5, 6, 7, 8, 9, 10], ReadPointer::whole(6), 1, 200));
    out.extend(episode_records(model, vec![3], ReadPointer::whole(1), 4, 300));
    out.extend(episode_records(model, vec![11, 12, 13, 14], ReadPointer::whole(4), 2, 400));
    out
}

// ── Order preservation ───────────────────────────────────────────────

#[test]
fn test_output_order_matches_input_order() {
    let model = simple_model();
    let records = mixed_records(&model);
    let batched = model.get_probs_batch(&records, InferenceMode::Eval).unwrap();
    assert_eq!(batched.len(), records.len());
    for (i, record) in records.iter().enumerate() {
        let alone = model.get_probs_batch(std::slice::from_ref(record), InferenceMode::Eval).unwrap();
        check_close(&format!("record {i}"), batched[i].probs(), alone[0].probs(), 1e-6);
    }
}

#[test]
fn test_reversed_batch_gives_reversed_output() {
    let model = pointer_model();
    let mut records = Vec::new();
    records.extend(episode_records(&model, vec![1, 2, 3], ReadPointer::new(0, 2), 2, 1));
    records.extend(episode_records(&model, vec![4, 5, 6, 7, 8], ReadPointer::new(2, 5), 3, 2));
    let forward = model.get_probs_batch(&records, InferenceMode::Eval).unwrap();
    records.reverse();
    let mut backward = model.get_probs_batch(&records, InferenceMode::Eval).unwrap();
    backward.reverse();
    for (i, (a, b)) in forward.iter().zip(&backward).enumerate() {
        check_close(&format!("record {i}"), a.probs(), b.probs(), 1e-6);
    }
}

#[test]
fn test_equal_length_instructions_keep_their_slots() {
    let model = simple_model();
    let a = episode_records(&model, vec![1, 2, 3], ReadPointer::whole(3), 1, 10).remove(0);
    let b = episode_records(&model, vec![7, 8, 9], ReadPointer::whole(3), 1, 20).remove(0);
    let out = model.get_probs_batch(&[a.clone(), b.clone()], InferenceMode::Eval).unwrap();
    let only_b = model.get_probs_batch(&[b], InferenceMode::Eval).unwrap();
    let only_a = model.get_probs_batch(&[a], InferenceMode::Eval).unwrap();
    check_close("a", out[0].probs(), only_a[0].probs(), 1e-6);
    check_close("b", out[1].probs(), only_b[0].probs(), 1e-6);
}

// ── No-op substitution ───────────────────────────────────────────────

#[test]
fn test_missing_previous_action_is_the_noop_index() {
    let model = simple_model();
    let frame = rand_frame(&model, 77);
    let instruction = vec![2, 4, 6];
    let none = ObservationRecord::new(vec![frame.clone()], instruction.clone(), ReadPointer::whole(3), None).unwrap();
    let noop = ObservationRecord::new(
        vec![frame],
        instruction,
        ReadPointer::whole(3),
        Some(model.config().none_action()),
    )
    .unwrap();
    let out = model.get_probs_batch(&[none, noop], InferenceMode::Eval).unwrap();
    assert_eq!(out[0], out[1]);
}

#[test]
fn test_previous_action_changes_distribution() {
    let model = simple_model();
    let frame = rand_frame(&model, 78);
    let make = |action| {
        ObservationRecord::new(vec![frame.clone(), frame.clone()], vec![1, 2], ReadPointer::whole(2), Some(action))
            .unwrap()
    };
    let out = model.get_probs_batch(&[make(0), make(3)], InferenceMode::Eval).unwrap();
    assert_ne!(out[0], out[1]);
}

// ── Distribution validity ────────────────────────────────────────────

#[test]
fn test_every_output_is_a_distribution() {
    for model in [simple_model(), pointer_model()] {
        let records = episode_records(&model, vec![1, 3, 5, 7], ReadPointer::new(1, 3), 5, 9);
        let num_actions = model.config().num_actions;
        for dist in model.get_probs_batch(&records, InferenceMode::Eval).unwrap() {
            assert_valid_distribution(dist.probs(), num_actions);
        }
        let step = model.get_probs(&records[0], None, InferenceMode::Eval).unwrap();
        assert_valid_distribution(step.distribution.probs(), num_actions);
    }
}

// ── Dropout ──────────────────────────────────────────────────────────

#[test]
fn test_train_mode_dropout_is_seeded() {
    let mut constants = PolicyConstants::test_constants();
    constants.fusion_dropout = 0.5;
    constants.fusion_hidden_dim = 64;
    let model = IncrementalPolicyModel::new(PolicyConfig::test_config(), constants).unwrap();
    let records = episode_records(&model, vec![1, 2, 3], ReadPointer::whole(3), 3, 4);

    let train = InferenceMode::Train { dropout_seed: 99 };
    let a = model.get_probs_batch(&records, train).unwrap();
    let b = model.get_probs_batch(&records, train).unwrap();
    assert_eq!(a, b);

    let eval = model.get_probs_batch(&records, InferenceMode::Eval).unwrap();
    assert_ne!(a, eval);
    for dist in &a {
        assert_valid_distribution(dist.probs(), model.config().num_actions);
    }
}

#[test]
fn test_zero_dropout_train_equals_eval() {
    let model = simple_model();
    let records = episode_records(&model, vec![1, 2, 3], ReadPointer::whole(3), 3, 4);
    let train = model.get_probs_batch(&records, InferenceMode::Train { dropout_seed: 5 }).unwrap();
    let eval = model.get_probs_batch(&records, InferenceMode::Eval).unwrap();
    assert_eq!(train, eval);
}
