/// Rollout: drive a model through one episode against an action channel.
///
/// A session owns the episode's current record and the recurrent carry, and
/// threads the carry strictly in step order: `step` then `observe`, repeated.
/// The model is borrowed per call, so many sessions can share one model.

use std::time::Instant;

use crate::error::PolicyError;
use crate::fusion::{InferenceMode, RecurrentCarry, StepOutput};
use crate::model::IncrementalPolicyModel;
use crate::observation::{ObservationRecord, ReadPointer};
use crate::tensor::Tensor;

/// What the environment returns after executing an action.
#[derive(Clone, Debug)]
pub struct StepFeedback {
    pub image: Tensor,
    pub done: bool,
}

/// Transport boundary to the environment.
pub trait ActionChannel {
    fn execute(&mut self, action: usize) -> StepFeedback;
}

pub struct RolloutSession {
    record: ObservationRecord,
    carry: Option<RecurrentCarry>,
    /// Pointer move requested after a step, applied to the next frame.
    pending_pointer: Option<ReadPointer>,
    awaiting_observation: bool,
    steps_taken: usize,
    total_step_ms: f32,
}

impl RolloutSession {
    pub fn new(start: ObservationRecord) -> Self {
        RolloutSession {
            record: start,
            carry: None,
            pending_pointer: None,
            awaiting_observation: false,
            steps_taken: 0,
            total_step_ms: 0.0,
        }
    }

    /// Run the model on the current record, folding its newest image into
    /// the carry. Must be followed by `observe` before the next step.
    pub fn step(&mut self, model: &IncrementalPolicyModel, mode: InferenceMode) -> Result<StepOutput, PolicyError> {
        if self.awaiting_observation {
            return Err(PolicyError::InvalidObservation {
                reason: format!("step {} already taken, observe the next image first", self.record.time_step()),
            });
        }
        let start = Instant::now();
        let output = model.get_probs(&self.record, self.carry.as_ref(), mode)?;
        self.total_step_ms += start.elapsed().as_secs_f32() * 1000.0;
        self.steps_taken += 1;
        self.carry = Some(output.carry.clone());
        self.awaiting_observation = true;
        Ok(output)
    }

    /// Append the image produced by executing `action`.
    pub fn observe(&mut self, image: Tensor, action: usize) -> Result<(), PolicyError> {
        if !self.awaiting_observation {
            return Err(PolicyError::InvalidObservation {
                reason: "observe called before step".into(),
            });
        }
        let mut record = self.record.advance(image, action)?;
        if let Some(pointer) = self.pending_pointer.take() {
            record = record.with_read_pointer(pointer)?;
        }
        self.record = record;
        self.awaiting_observation = false;
        Ok(())
    }

    /// Move the read pointer for subsequent steps. Between `step` and
    /// `observe` the newest frame is already in the carry, so the move takes
    /// effect from the next observed frame.
    pub fn set_read_pointer(&mut self, pointer: ReadPointer) -> Result<(), PolicyError> {
        pointer.check(self.record.instruction().len())?;
        if self.awaiting_observation {
            self.pending_pointer = Some(pointer);
        } else {
            self.record = self.record.with_read_pointer(pointer)?;
        }
        Ok(())
    }

    pub fn record(&self) -> &ObservationRecord {
        &self.record
    }

    pub fn carry(&self) -> Option<&RecurrentCarry> {
        self.carry.as_ref()
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    /// Mean wall time of `step`, 0 before the first step.
    pub fn average_step_ms(&self) -> f32 {
        if self.steps_taken == 0 {
            return 0.0;
        }
        self.total_step_ms / self.steps_taken as f32
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EpisodeSummary {
    pub actions: Vec<usize>,
    pub steps: usize,
    /// True if the channel ended the episode before `max_steps`.
    pub done: bool,
    pub average_step_ms: f32,
}

/// Greedy rollout for at most `max_steps` actions.
pub fn run_episode(
    model: &IncrementalPolicyModel,
    channel: &mut dyn ActionChannel,
    start_record: ObservationRecord,
    max_steps: usize,
    mode: InferenceMode,
) -> Result<EpisodeSummary, PolicyError> {
    let mut session = RolloutSession::new(start_record);
    let mut actions = Vec::with_capacity(max_steps);
    let mut done = false;
    for _ in 0..max_steps {
        let output = session.step(model, mode)?;
        let action = output.distribution.greedy();
        actions.push(action);
        let feedback = channel.execute(action);
        if feedback.done {
            done = true;
            break;
        }
        session.observe(feedback.image, action)?;
    }
    let summary = EpisodeSummary {
        steps: actions.len(),
        actions,
        done,
        average_step_ms: session.average_step_ms(),
    };
    tracing::info!(steps = summary.steps, done, avg_ms = summary.average_step_ms, "episode finished");
    Ok(summary)
}
