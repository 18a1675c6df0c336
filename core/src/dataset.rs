/// Demonstration episodes: the boundary between recorded data and the model.

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::observation::{ObservationRecord, ReadPointer};
use crate::tensor::Tensor;

/// One recorded episode. `images[t]` is the frame seen before `actions[t]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemonstrationEpisode {
    pub instruction: Vec<usize>,
    pub read_pointer: ReadPointer,
    pub images: Vec<Tensor>,
    pub actions: Vec<usize>,
}

impl DemonstrationEpisode {
    /// One record per action. Record `t` holds images `0..=t` and
    /// `actions[t-1]` as its previous action (none at `t = 0`).
    pub fn to_observation_records(&self) -> Result<Vec<ObservationRecord>, PolicyError> {
        if self.actions.is_empty() {
            return Ok(Vec::new());
        }
        if self.images.len() < self.actions.len() {
            return Err(PolicyError::InvalidObservation {
                reason: format!(
                    "episode has {} actions but only {} images",
                    self.actions.len(),
                    self.images.len()
                ),
            });
        }
        let mut records = Vec::with_capacity(self.actions.len());
        let mut record = ObservationRecord::start(self.images[0].clone(), self.instruction.clone(), self.read_pointer)?;
        for t in 1..self.actions.len() {
            let next = record.advance(self.images[t].clone(), self.actions[t - 1])?;
            records.push(record);
            record = next;
        }
        records.push(record);
        Ok(records)
    }

    /// Target action for each record from `to_observation_records`.
    pub fn targets(&self) -> &[usize] {
        &self.actions
    }
}
