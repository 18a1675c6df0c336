//! Parameter enumeration: complete partition into five groups, stable
//! buffers, and optimiser updates through the flat view.


use std::collections::HashSet;

use incremental_policy_core::observation::ReadPointer;
use incremental_policy_core::{InferenceMode, ParamGroup, PolicyError};
use policy_test_utils::*;

#[test]
fn test_groups_partition_all_parameters() {
    for model in [simple_model(), pointer_model()] {
        let params = model.get_parameters();
        let total: usize = params.iter().map(|p| p.data.len()).sum();
        assert_eq!(total, model.num_params());
        assert_eq!(total, model.flatten_parameters().len());

        let per_group = model.params_per_group();
        assert_eq!(per_group.iter().map(|(g, _)| *g).collect::<Vec<_>>(), ParamGroup::ALL.to_vec());
        assert_eq!(per_group.iter().map(|(_, n)| n).sum::<usize>(), total);
        assert!(per_group.iter().all(|(_, n)| *n > 0));

        for (group, count) in per_group {
            let in_group: usize = params.iter().filter(|p| p.group == group).map(|p| p.data.len()).sum();
            assert_eq!(in_group, count, "{group}");
        }
    }
}

#[test]
fn test_groups_appear_in_fixed_order() {
    let model = pointer_model();
    let mut order: Vec<ParamGroup> = Vec::new();
    for p in model.get_parameters() {
        if order.last() != Some(&p.group) {
            order.push(p.group);
        }
    }
    assert_eq!(order, ParamGroup::ALL.to_vec());
}

#[test]
fn test_no_tensor_listed_twice() {
    let model = pointer_model();
    let mut seen = HashSet::new();
    for p in model.get_parameters() {
        assert!(seen.insert(p.data.as_ptr() as usize), "{} {} listed twice", p.group, p.name);
    }
}

#[test]
fn test_buffers_stable_across_calls() {
    let mut model = simple_model();
    let ptrs: Vec<usize> = model.get_parameters().iter().map(|p| p.data.as_ptr() as usize).collect();

    let records = episode_records(&model, vec![1, 2], ReadPointer::whole(2), 3, 1);
    model.get_probs_batch(&records, InferenceMode::Eval).unwrap();
    let grads = vec![0.01f32; model.num_params()];
    model.apply_gradients(&grads, 1.0).unwrap();

    let again: Vec<usize> = model.get_parameters().iter().map(|p| p.data.as_ptr() as usize).collect();
    assert_eq!(ptrs, again);
}

#[test]
fn test_pointer_encoder_has_more_text_parameters() {
    let text = |m: &incremental_policy_core::IncrementalPolicyModel| m.params_per_group()[ParamGroup::Text.index()].1;
    assert!(text(&pointer_model()) > text(&simple_model()));
}

#[test]
fn test_mutable_view_updates_model() {
    let mut model = simple_model();
    for p in model.get_parameters_mut() {
        if p.group == ParamGroup::Fusion {
            p.data.fill(0.0);
        }
    }
    // all-zero head gives a uniform distribution
    let records = episode_records(&model, vec![5], ReadPointer::whole(1), 2, 2);
    let out = model.get_probs_batch(&records, InferenceMode::Eval).unwrap();
    let n = model.config().num_actions as f32;
    for dist in out {
        check_close("uniform", dist.probs(), &vec![1.0 / n; n as usize], 1e-6);
    }
}

#[test]
fn test_apply_gradients_rejects_wrong_length() {
    let mut model = simple_model();
    let n = model.num_params();
    assert!(matches!(
        model.apply_gradients(&vec![0.0; n + 1], 0.1),
        Err(PolicyError::GradientLength { expected, found }) if expected == n && found == n + 1
    ));
}
