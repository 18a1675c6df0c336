/// Image-history recurrence: an LSTM over per-frame image embeddings.
///
/// Full-history mode runs each record's padded sequence up to its true length
/// from a zero state. Incremental mode advances a carried state by one frame.
/// Both go through the same `lstm_step`, so threading the carry reproduces the
/// full-history result exactly.

use crate::device::{Device, ExecutionContext};
use crate::error::PersistenceError;
use crate::lstm::{lstm_step, LstmParams, LstmState};
use crate::submodule::{check_dim, check_layout, unexpected_state, Encode, GroupState, ParamGroup, SubModule};
use crate::tensor::{SimpleRng, Tensor};

/// Right-padded embedding sequences: `embeddings` is `[B * max_len, D]`,
/// record `b` owns rows `b*max_len .. b*max_len + lengths[b]`.
pub struct PaddedSequences<'a> {
    pub embeddings: &'a Tensor,
    pub lengths: &'a [usize],
    pub max_len: usize,
}

pub struct ImageRecurrenceModule {
    params: LstmParams,
    device: Device,
}

impl ImageRecurrenceModule {
    pub fn new(input_dim: usize, output_dim: usize, rng: &mut SimpleRng, ctx: &ExecutionContext) -> Self {
        ImageRecurrenceModule {
            params: LstmParams::init(input_dim, output_dim, rng),
            device: ctx.device(),
        }
    }

    pub fn hidden_dim(&self) -> usize {
        self.params.hidden_dim
    }

    pub fn initial_state(&self) -> LstmState {
        LstmState::zeros(self.params.hidden_dim)
    }

    /// Advance `prev` by one frame embedding.
    pub fn step(&self, emb: &[f32], prev: &LstmState) -> LstmState {
        lstm_step(&self.params, emb, prev)
    }

    /// Final state of every record, never reading past its true length.
    pub fn run_padded(&self, input: &PaddedSequences<'_>) -> Vec<LstmState> {
        input
            .lengths
            .iter()
            .enumerate()
            .map(|(b, &len)| {
                debug_assert!(len <= input.max_len);
                let mut state = self.initial_state();
                for t in 0..len {
                    state = self.step(input.embeddings.row(b * input.max_len + t), &state);
                }
                state
            })
            .collect()
    }
}

impl Encode for ImageRecurrenceModule {
    type Input<'a> = PaddedSequences<'a>;

    fn output_dim(&self) -> usize {
        self.params.hidden_dim
    }

    fn encode(&self, input: Self::Input<'_>) -> Tensor {
        let rows: Vec<Vec<f32>> = self.run_padded(&input).into_iter().map(|s| s.h).collect();
        Tensor::from_rows(&rows, self.params.hidden_dim)
    }
}

impl SubModule for ImageRecurrenceModule {
    fn group(&self) -> ParamGroup {
        ParamGroup::ImageRecurrence
    }

    fn device(&self) -> Device {
        self.device
    }

    fn tensors(&self) -> Vec<(&'static str, &[f32])> {
        lstm_tensors(&self.params)
    }

    fn tensors_mut(&mut self) -> Vec<(&'static str, &mut [f32])> {
        lstm_tensors_mut(&mut self.params)
    }

    fn state(&self) -> GroupState {
        GroupState::ImageRecurrence(self.params.clone())
    }

    fn load_state(&mut self, state: GroupState) -> Result<(), PersistenceError> {
        let params = match state {
            GroupState::ImageRecurrence(p) => p,
            other => return Err(unexpected_state(ParamGroup::ImageRecurrence, &other)),
        };
        let g = ParamGroup::ImageRecurrence;
        check_dim(g, "input_dim", self.params.input_dim, params.input_dim)?;
        check_dim(g, "hidden_dim", self.params.hidden_dim, params.hidden_dim)?;
        check_layout(g, &self.tensors(), &lstm_tensors(&params))?;
        self.params = params;
        Ok(())
    }
}

pub(crate) fn lstm_tensors(p: &LstmParams) -> Vec<(&'static str, &[f32])> {
    vec![
        ("w_ih", p.w_ih.as_slice()),
        ("w_hh", p.w_hh.as_slice()),
        ("b", p.b.as_slice()),
    ]
}

pub(crate) fn lstm_tensors_mut(p: &mut LstmParams) -> Vec<(&'static str, &mut [f32])> {
    vec![
        ("w_ih", p.w_ih.as_mut_slice()),
        ("w_hh", p.w_hh.as_mut_slice()),
        ("b", p.b.as_mut_slice()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequences(rng: &mut SimpleRng, rows: usize, d: usize) -> Tensor {
        Tensor::from_vec(rng.uniform_vec(rows * d, 1.0), &[rows, d])
    }

    #[test]
    fn test_padding_is_not_read() {
        let mut rng = SimpleRng::new(9);
        let m = ImageRecurrenceModule::new(4, 4, &mut rng, &ExecutionContext::cpu());
        let mut emb = sequences(&mut rng, 2 * 3, 4);
        let lengths = [3, 1];
        let before = m.encode(PaddedSequences { embeddings: &emb, lengths: &lengths, max_len: 3 });

        // scribble over record 1's padding rows
        for v in &mut emb.data[(3 + 1) * 4..] {
            *v = 100.0;
        }
        let after = m.encode(PaddedSequences { embeddings: &emb, lengths: &lengths, max_len: 3 });
        assert_eq!(before.row(1), after.row(1));
    }

    #[test]
    fn test_steps_match_padded_run() {
        let mut rng = SimpleRng::new(10);
        let m = ImageRecurrenceModule::new(4, 3, &mut rng, &ExecutionContext::cpu());
        let emb = sequences(&mut rng, 5, 4);
        let full = m.run_padded(&PaddedSequences { embeddings: &emb, lengths: &[5], max_len: 5 });

        let mut state = m.initial_state();
        for t in 0..5 {
            state = m.step(emb.row(t), &state);
        }
        assert_eq!(full[0], state);
    }
}
