//! Rollout sessions against a scripted action channel.


use incremental_policy_core::observation::{ObservationRecord, ReadPointer};
use incremental_policy_core::rollout::{run_episode, ActionChannel, RolloutSession, StepFeedback};
use incremental_policy_core::tensor::Tensor;
use incremental_policy_core::{IncrementalPolicyModel, InferenceMode, PolicyError};
use policy_test_utils::*;

/// Emits fresh random frames and ends the episode after `done_after` actions.
struct ScriptedChannel {
    frames: Vec<Tensor>,
    executed: Vec<usize>,
    done_after: usize,
}

impl ScriptedChannel {
    fn new(model: &IncrementalPolicyModel, done_after: usize) -> Self {
        let frames = (0..done_after + 1).map(|i| rand_frame(model, 500 + i as u64)).collect();
        ScriptedChannel { frames, executed: Vec::new(), done_after }
    }
}

impl ActionChannel for ScriptedChannel {
    fn execute(&mut self, action: usize) -> StepFeedback {
        self.executed.push(action);
        let n = self.executed.len();
        StepFeedback { image: self.frames[n.min(self.frames.len() - 1)].clone(), done: n >= self.done_after }
    }
}

fn start(model: &IncrementalPolicyModel) -> ObservationRecord {
    ObservationRecord::start(rand_frame(model, 1), vec![2, 3, 4], ReadPointer::new(0, 2)).unwrap()
}

#[test]
fn test_episode_stops_when_channel_is_done() {
    let model = pointer_model();
    let mut channel = ScriptedChannel::new(&model, 3);
    let summary = run_episode(&model, &mut channel, start(&model), 10, InferenceMode::Eval).unwrap();
    assert!(summary.done);
    assert_eq!(summary.steps, 3);
    assert_eq!(summary.actions, channel.executed);
    assert!(summary.actions.iter().all(|&a| a < model.config().num_actions));
}

#[test]
fn test_episode_respects_max_steps() {
    let model = simple_model();
    let mut channel = ScriptedChannel::new(&model, 100);
    let summary = run_episode(&model, &mut channel, start(&model), 4, InferenceMode::Eval).unwrap();
    assert!(!summary.done);
    assert_eq!(summary.steps, 4);
}

#[test]
fn test_session_carry_matches_full_history() {
    let model = simple_model();
    let mut session = RolloutSession::new(start(&model));
    for t in 0..4 {
        let out = session.step(&model, InferenceMode::Eval).unwrap();
        let full = model.get_probs_batch(std::slice::from_ref(session.record()), InferenceMode::Eval).unwrap();
        check_close(&format!("step {t}"), out.distribution.probs(), full[0].probs(), 1e-6);
        session.observe(rand_frame(&model, 900 + t), out.distribution.greedy()).unwrap();
    }
    assert_eq!(session.record().num_images(), 5);
    assert_eq!(session.carry().map(|c| c.steps()), Some(4));
    assert_eq!(session.steps_taken(), 4);
    assert!(session.average_step_ms() >= 0.0);
}

#[test]
fn test_pointer_moved_between_step_and_observe_applies_to_next_frame() {
    let model = pointer_model();
    let mut session = RolloutSession::new(start(&model));
    let out = session.step(&model, InferenceMode::Eval).unwrap();
    session.set_read_pointer(ReadPointer::new(1, 3)).unwrap();
    assert_eq!(session.record().read_pointer(), ReadPointer::new(0, 2));

    session.observe(rand_frame(&model, 41), out.distribution.greedy()).unwrap();
    assert_eq!(session.record().frame_pointers(), &[ReadPointer::new(0, 2), ReadPointer::new(1, 3)]);
}

#[test]
fn test_out_of_range_pointer_rejected_by_session() {
    let model = pointer_model();
    let mut session = RolloutSession::new(start(&model));
    session.step(&model, InferenceMode::Eval).unwrap();
    assert!(matches!(
        session.set_read_pointer(ReadPointer::new(0, 9)),
        Err(PolicyError::ReadPointerOutOfRange { .. })
    ));
}

#[test]
fn test_session_enforces_step_order() {
    let model = simple_model();
    let mut session = RolloutSession::new(start(&model));
    assert!(matches!(
        session.observe(rand_frame(&model, 2), 0),
        Err(PolicyError::InvalidObservation { .. })
    ));
    session.step(&model, InferenceMode::Eval).unwrap();
    assert!(matches!(
        session.step(&model, InferenceMode::Eval),
        Err(PolicyError::InvalidObservation { .. })
    ));
}
