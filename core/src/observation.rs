//! Observation records: everything the policy may condition on at one step.
//!
//! A record is built by the harness, consumed read-only by the model, and
//! replaced (never mutated) when the episode advances. Image frames are
//! shared between successive records, so growing the history is cheap.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::tensor::Tensor;

/// Half-open token span `[start, end)` the pointer encoder attends to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPointer {
    pub start: usize,
    pub end: usize,
}

impl ReadPointer {
    pub fn new(start: usize, end: usize) -> Self {
        ReadPointer { start, end }
    }

    /// Pointer covering the whole instruction.
    pub fn whole(len: usize) -> Self {
        ReadPointer { start: 0, end: len }
    }

    pub fn check(&self, len: usize) -> Result<(), PolicyError> {
        if self.start >= self.end || self.end > len {
            return Err(PolicyError::ReadPointerOutOfRange {
                start: self.start,
                end: self.end,
                len,
            });
        }
        Ok(())
    }
}

/// `frame_pointers[t]` is the read pointer that was in force when frame `t`
/// was the newest frame; the last entry is the current pointer.
#[derive(Clone, Debug)]
pub struct ObservationRecord {
    images: Vec<Arc<Tensor>>,
    frame_pointers: Vec<ReadPointer>,
    instruction: Arc<[usize]>,
    previous_action: Option<usize>,
}

impl ObservationRecord {
    /// Build a record, checking the structural invariants: at least one image,
    /// every image `[C, H, W]` with the same shape, a non-empty instruction and
    /// a read pointer inside it. Every frame is taken as seen under `read_pointer`.
    pub fn new(
        images: Vec<Tensor>,
        instruction: Vec<usize>,
        read_pointer: ReadPointer,
        previous_action: Option<usize>,
    ) -> Result<Self, PolicyError> {
        let images: Vec<Arc<Tensor>> = images.into_iter().map(Arc::new).collect();
        let frame_pointers = vec![read_pointer; images.len()];
        Self::from_parts(images, frame_pointers, instruction.into(), previous_action)
    }

    /// First record of an episode: one image, no previous action.
    pub fn start(image: Tensor, instruction: Vec<usize>, read_pointer: ReadPointer) -> Result<Self, PolicyError> {
        Self::new(vec![image], instruction, read_pointer, None)
    }

    fn from_parts(
        images: Vec<Arc<Tensor>>,
        frame_pointers: Vec<ReadPointer>,
        instruction: Arc<[usize]>,
        previous_action: Option<usize>,
    ) -> Result<Self, PolicyError> {
        let first = images.first().ok_or_else(|| PolicyError::InvalidObservation {
            reason: "image history is empty".into(),
        })?;
        if first.shape.len() != 3 {
            return Err(PolicyError::InvalidObservation {
                reason: format!("images must be [C, H, W], got shape {:?}", first.shape),
            });
        }
        if let Some(bad) = images.iter().find(|img| img.shape != first.shape) {
            return Err(PolicyError::InvalidObservation {
                reason: format!("image history mixes shapes {:?} and {:?}", first.shape, bad.shape),
            });
        }
        if instruction.is_empty() {
            return Err(PolicyError::InvalidObservation {
                reason: "instruction has no tokens".into(),
            });
        }
        debug_assert_eq!(frame_pointers.len(), images.len());
        for pointer in &frame_pointers {
            pointer.check(instruction.len())?;
        }
        Ok(ObservationRecord { images, frame_pointers, instruction, previous_action })
    }

    /// Next step's record: history grows by `image`, `action` becomes the
    /// previous action. Instruction and current pointer carry over.
    pub fn advance(&self, image: Tensor, action: usize) -> Result<Self, PolicyError> {
        let mut images = self.images.clone();
        images.push(Arc::new(image));
        let mut frame_pointers = self.frame_pointers.clone();
        frame_pointers.push(self.read_pointer());
        Self::from_parts(images, frame_pointers, Arc::clone(&self.instruction), Some(action))
    }

    /// Copy with the read pointer moved by the harness. The move applies to
    /// the newest frame; earlier frames keep the pointer they were seen under.
    pub fn with_read_pointer(&self, read_pointer: ReadPointer) -> Result<Self, PolicyError> {
        read_pointer.check(self.instruction.len())?;
        let mut frame_pointers = self.frame_pointers.clone();
        let last = frame_pointers.len() - 1;
        frame_pointers[last] = read_pointer;
        Ok(ObservationRecord { frame_pointers, ..self.clone() })
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    /// Zero-based step index within the episode.
    pub fn time_step(&self) -> usize {
        self.images.len() - 1
    }

    pub fn image_history(&self) -> impl Iterator<Item = &Tensor> {
        self.images.iter().map(|img| img.as_ref())
    }

    pub fn image(&self, t: usize) -> &Tensor {
        &self.images[t]
    }

    pub fn last_image(&self) -> &Tensor {
        // non-empty by construction
        &self.images[self.images.len() - 1]
    }

    pub fn instruction(&self) -> &[usize] {
        &self.instruction
    }

    /// Current read pointer.
    pub fn read_pointer(&self) -> ReadPointer {
        self.frame_pointers[self.frame_pointers.len() - 1]
    }

    /// Pointer in force when frame `t` was the newest frame.
    pub fn frame_pointer(&self, t: usize) -> ReadPointer {
        self.frame_pointers[t]
    }

    pub fn frame_pointers(&self) -> &[ReadPointer] {
        &self.frame_pointers
    }

    pub fn previous_action(&self) -> Option<usize> {
        self.previous_action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(v: f32) -> Tensor {
        Tensor::from_vec(vec![v; 3 * 2 * 2], &[3, 2, 2])
    }

    #[test]
    fn test_empty_history_rejected() {
        let err = ObservationRecord::new(vec![], vec![1, 2], ReadPointer::whole(2), None).unwrap_err();
        assert!(matches!(err, PolicyError::InvalidObservation { .. }));
    }

    #[test]
    fn test_mixed_shapes_rejected() {
        let other = Tensor::zeros(&[3, 4, 4]);
        let err = ObservationRecord::new(vec![img(0.0), other], vec![1], ReadPointer::whole(1), Some(0))
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidObservation { .. }));
    }

    #[test]
    fn test_pointer_must_fit_instruction() {
        let err = ObservationRecord::start(img(0.0), vec![1, 2, 3], ReadPointer::new(1, 4)).unwrap_err();
        assert!(matches!(err, PolicyError::ReadPointerOutOfRange { start: 1, end: 4, len: 3 }));
        let err = ObservationRecord::start(img(0.0), vec![1, 2, 3], ReadPointer::new(2, 2)).unwrap_err();
        assert!(matches!(err, PolicyError::ReadPointerOutOfRange { .. }));
    }

    #[test]
    fn test_advance_grows_history() {
        let r0 = ObservationRecord::start(img(0.0), vec![4, 5], ReadPointer::whole(2)).unwrap();
        assert_eq!(r0.time_step(), 0);
        assert_eq!(r0.previous_action(), None);

        let r1 = r0.advance(img(1.0), 3).unwrap();
        assert_eq!(r1.num_images(), 2);
        assert_eq!(r1.previous_action(), Some(3));
        assert_eq!(r1.last_image().data[0], 1.0);
        assert_eq!(r1.instruction(), &[4, 5]);
        // the earlier record is untouched
        assert_eq!(r0.num_images(), 1);
    }

    #[test]
    fn test_with_read_pointer() {
        let r = ObservationRecord::start(img(0.0), vec![1, 2, 3], ReadPointer::whole(3)).unwrap();
        let moved = r.with_read_pointer(ReadPointer::new(1, 3)).unwrap();
        assert_eq!(moved.read_pointer(), ReadPointer::new(1, 3));
        assert!(r.with_read_pointer(ReadPointer::new(0, 9)).is_err());
    }

    #[test]
    fn test_pointer_history_follows_moves() {
        let r0 = ObservationRecord::start(img(0.0), vec![1, 2, 3, 4], ReadPointer::new(0, 2)).unwrap();
        let r1 = r0.advance(img(1.0), 0).unwrap();
        assert_eq!(r1.frame_pointers(), &[ReadPointer::new(0, 2), ReadPointer::new(0, 2)]);

        let r1 = r1.with_read_pointer(ReadPointer::new(2, 4)).unwrap();
        assert_eq!(r1.frame_pointer(0), ReadPointer::new(0, 2));
        assert_eq!(r1.frame_pointer(1), ReadPointer::new(2, 4));

        let r2 = r1.advance(img(2.0), 1).unwrap();
        assert_eq!(r2.frame_pointer(2), ReadPointer::new(2, 4));
        assert_eq!(r2.read_pointer(), ReadPointer::new(2, 4));
    }
}
