//! Fusion module: combines the image-recurrence summary, instruction
//! embedding and previous-action embedding into an action distribution.
//!
//! Two shapes of the same computation:
//! - full history: every frame is encoded and the recurrence is re-derived
//!   from a zero state, no carry in or out;
//! - single step: only the newest frame is encoded and the recurrence advances
//!   from the incoming carry, which is returned updated.
//!
//! Head: x = [h_img ; text ; action], hidden = relu(x W1 + b1), probs = softmax(hidden W2 + b2).

use serde::{Deserialize, Serialize};

use crate::action_module::ActionModule;
use crate::device::{Device, ExecutionContext};
use crate::error::{PersistenceError, PolicyError};
use crate::image_module::{ImageInput, ImageModule};
use crate::image_recurrence::{ImageRecurrenceModule, PaddedSequences};
use crate::lstm::LstmState;
use crate::submodule::{check_dim, check_layout, unexpected_state, Encode, GroupState, ParamGroup, SubModule};
use crate::tensor::{linear_f32, relu_inplace, softmax_f32, SimpleRng, Tensor};
use crate::text_module::{TextEncoder, TextInput};

/// Whether the fusion head runs deterministically or with dropout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InferenceMode {
    #[default]
    Eval,
    /// Inverted dropout on the fusion hidden layer, masks drawn from `dropout_seed`
    /// mixed with each record's position in the caller's batch.
    Train { dropout_seed: u64 },
}

impl InferenceMode {
    fn row_seed(&self, row: usize) -> Option<u64> {
        match self {
            InferenceMode::Eval => None,
            InferenceMode::Train { dropout_seed } => {
                Some(dropout_seed ^ (row as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
            }
        }
    }
}

/// Probability vector over the full action space.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionDistribution {
    probs: Vec<f32>,
}

impl ActionDistribution {
    pub fn from_probs(probs: Vec<f32>) -> Self {
        ActionDistribution { probs }
    }

    pub fn probs(&self) -> &[f32] {
        &self.probs
    }

    pub fn num_actions(&self) -> usize {
        self.probs.len()
    }

    /// ln p(action), floored to stay finite.
    pub fn log_prob(&self, action: usize) -> Result<f32, PolicyError> {
        match self.probs.get(action) {
            Some(&p) => Ok(p.max(1e-8).ln()),
            None => Err(PolicyError::ActionOutOfRange { action, num_actions: self.probs.len() }),
        }
    }

    /// Most probable action; lowest index wins ties.
    pub fn greedy(&self) -> usize {
        let mut best = 0;
        for (a, &p) in self.probs.iter().enumerate() {
            if p > self.probs[best] {
                best = a;
            }
        }
        best
    }

    /// Draw an action by inverse-CDF sampling.
    pub fn sample(&self, rng: &mut SimpleRng) -> usize {
        let u = rng.unit();
        let mut acc = 0.0f32;
        for (a, &p) in self.probs.iter().enumerate() {
            acc += p;
            if u <= acc {
                return a;
            }
        }
        self.probs.len() - 1
    }
}

/// Opaque state threaded between single-step calls of one episode.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentCarry {
    pub(crate) image_recurrence: LstmState,
    pub(crate) steps: usize,
}

impl RecurrentCarry {
    /// Number of frames folded into this carry.
    pub fn steps(&self) -> usize {
        self.steps
    }
}

/// Result of one single-step call for one record.
#[derive(Clone, Debug)]
pub struct StepOutput {
    pub distribution: ActionDistribution,
    pub carry: RecurrentCarry,
    /// Embedding of the newest frame, `[image_emb_dim]`.
    pub image_embedding: Vec<f32>,
}

/// The four encoders the fusion head reads from.
pub struct Encoders {
    pub image: ImageModule,
    pub image_recurrence: ImageRecurrenceModule,
    pub text: TextEncoder,
    pub action: ActionModule,
}

/// Full-history batch. `frames` is `[B * max_len]` in record-major order,
/// right-padded; record `b` owns `frames[b*max_len .. b*max_len + lengths[b]]`.
/// `frame_text` holds one entry per real frame, record-major with no padding:
/// the instruction under the pointer that frame was seen with.
pub struct FullHistoryBatch<'a> {
    pub frames: &'a [&'a Tensor],
    pub lengths: &'a [usize],
    pub max_len: usize,
    pub text: &'a [TextInput<'a>],
    pub frame_text: &'a [TextInput<'a>],
    pub actions: &'a [usize],
    /// Caller-visible position of each row, for dropout masks.
    pub row_ids: &'a [usize],
}

/// Single-step batch: one newest frame and one optional carry per record.
pub struct StepBatch<'a> {
    pub frames: &'a [&'a Tensor],
    pub text: &'a [TextInput<'a>],
    pub actions: &'a [usize],
    pub carries: &'a [Option<&'a RecurrentCarry>],
}

/// Layout (row-major):
///   w1: [total_dim, hidden_dim]
///   w2: [hidden_dim, num_actions]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusionParams {
    pub total_dim: usize,
    pub hidden_dim: usize,
    pub num_actions: usize,
    pub w1: Vec<f32>,
    pub b1: Vec<f32>,
    pub w2: Vec<f32>,
    pub b2: Vec<f32>,
}

impl FusionParams {
    pub fn init(total_dim: usize, hidden_dim: usize, num_actions: usize, rng: &mut SimpleRng) -> Self {
        FusionParams {
            total_dim,
            hidden_dim,
            num_actions,
            w1: rng.uniform_vec(total_dim * hidden_dim, (2.0 / (total_dim + hidden_dim) as f32).sqrt()),
            b1: vec![0.0; hidden_dim],
            w2: rng.uniform_vec(hidden_dim * num_actions, (2.0 / (hidden_dim + num_actions) as f32).sqrt()),
            b2: vec![0.0; num_actions],
        }
    }

    fn tensors(&self) -> Vec<(&'static str, &[f32])> {
        vec![
            ("w1", self.w1.as_slice()),
            ("b1", self.b1.as_slice()),
            ("w2", self.w2.as_slice()),
            ("b2", self.b2.as_slice()),
        ]
    }
}

pub struct FusionModule {
    params: FusionParams,
    dropout: f32,
    device: Device,
}

impl FusionModule {
    pub fn new(
        total_dim: usize,
        hidden_dim: usize,
        num_actions: usize,
        dropout: f32,
        rng: &mut SimpleRng,
        ctx: &ExecutionContext,
    ) -> Self {
        FusionModule {
            params: FusionParams::init(total_dim, hidden_dim, num_actions, rng),
            dropout,
            device: ctx.device(),
        }
    }

    pub fn num_actions(&self) -> usize {
        self.params.num_actions
    }

    /// Fused embedding → action distribution.
    fn head(&self, fused: &[f32], mask_seed: Option<u64>) -> ActionDistribution {
        let p = &self.params;
        debug_assert_eq!(fused.len(), p.total_dim);

        let mut hidden = vec![0.0f32; p.hidden_dim];
        linear_f32(fused, &p.w1, &p.b1, &mut hidden);
        relu_inplace(&mut hidden);
        if let Some(seed) = mask_seed {
            if self.dropout > 0.0 {
                let mut rng = SimpleRng::new(seed);
                let keep = 1.0 - self.dropout;
                for v in hidden.iter_mut() {
                    *v = if rng.unit() < self.dropout { 0.0 } else { *v / keep };
                }
            }
        }

        let mut logits = vec![0.0f32; p.num_actions];
        linear_f32(&hidden, &p.w2, &p.b2, &mut logits);
        let mut probs = vec![0.0f32; p.num_actions];
        softmax_f32(&logits, &mut probs, 1, p.num_actions);
        ActionDistribution::from_probs(probs)
    }

    fn fuse(image_summary: &[f32], text: &[f32], action: &[f32]) -> Vec<f32> {
        let mut x = Vec::with_capacity(image_summary.len() + text.len() + action.len());
        x.extend_from_slice(image_summary);
        x.extend_from_slice(text);
        x.extend_from_slice(action);
        x
    }

    /// Full-history inference: no carry in, no carry out.
    pub fn forward_full(
        &self,
        enc: &Encoders,
        batch: &FullHistoryBatch<'_>,
        mode: InferenceMode,
    ) -> Vec<ActionDistribution> {
        let b = batch.lengths.len();
        debug_assert_eq!(batch.frames.len(), b * batch.max_len);
        debug_assert_eq!(batch.frame_text.len(), batch.lengths.iter().sum::<usize>());
        let text_emb = enc.text.encode(batch.text);
        let frame_text_emb = enc.text.encode(batch.frame_text);
        let action_emb = enc.action.encode(batch.actions);

        // Encode only real frames; padding rows stay zero and are never read.
        let d_img = enc.image.output_dim();
        let mut image_emb = Tensor::zeros(&[b * batch.max_len, d_img]);
        let mut text_offset = 0;
        for r in 0..b {
            let len = batch.lengths[r];
            let start = r * batch.max_len;
            let text_rows: Vec<&[f32]> = (text_offset..text_offset + len).map(|i| frame_text_emb.row(i)).collect();
            text_offset += len;
            let encoded = enc.image.encode(ImageInput {
                frames: &batch.frames[start..start + len],
                text: &text_rows,
            });
            image_emb.data[start * d_img..(start + len) * d_img].copy_from_slice(&encoded.data);
        }

        let summaries = enc.image_recurrence.encode(PaddedSequences {
            embeddings: &image_emb,
            lengths: batch.lengths,
            max_len: batch.max_len,
        });

        (0..b)
            .map(|r| {
                let fused = Self::fuse(summaries.row(r), text_emb.row(r), action_emb.row(r));
                self.head(&fused, mode.row_seed(batch.row_ids[r]))
            })
            .collect()
    }

    /// Single-step inference from the incoming carries.
    pub fn forward_step(
        &self,
        enc: &Encoders,
        batch: &StepBatch<'_>,
        mode: InferenceMode,
    ) -> Result<Vec<StepOutput>, PolicyError> {
        let hidden = enc.image_recurrence.hidden_dim();
        for carry in batch.carries.iter().flatten() {
            if carry.image_recurrence.h.len() != hidden || carry.image_recurrence.c.len() != hidden {
                return Err(PolicyError::CarryMismatch {
                    expected: hidden,
                    found: carry.image_recurrence.h.len(),
                });
            }
        }

        let text_emb = enc.text.encode(batch.text);
        let action_emb = enc.action.encode(batch.actions);
        let text_rows: Vec<&[f32]> = (0..batch.frames.len()).map(|r| text_emb.row(r)).collect();
        let image_emb = enc.image.encode(ImageInput { frames: batch.frames, text: &text_rows });

        let outputs = batch
            .carries
            .iter()
            .enumerate()
            .map(|(r, carry)| {
                let (prev, steps) = match carry {
                    Some(c) => (c.image_recurrence.clone(), c.steps),
                    None => (enc.image_recurrence.initial_state(), 0),
                };
                let next = enc.image_recurrence.step(image_emb.row(r), &prev);
                let fused = Self::fuse(&next.h, text_emb.row(r), action_emb.row(r));
                StepOutput {
                    distribution: self.head(&fused, mode.row_seed(r)),
                    carry: RecurrentCarry { image_recurrence: next, steps: steps + 1 },
                    image_embedding: image_emb.row(r).to_vec(),
                }
            })
            .collect();
        Ok(outputs)
    }
}

impl SubModule for FusionModule {
    fn group(&self) -> ParamGroup {
        ParamGroup::Fusion
    }

    fn device(&self) -> Device {
        self.device
    }

    fn tensors(&self) -> Vec<(&'static str, &[f32])> {
        self.params.tensors()
    }

    fn tensors_mut(&mut self) -> Vec<(&'static str, &mut [f32])> {
        let p = &mut self.params;
        vec![
            ("w1", p.w1.as_mut_slice()),
            ("b1", p.b1.as_mut_slice()),
            ("w2", p.w2.as_mut_slice()),
            ("b2", p.b2.as_mut_slice()),
        ]
    }

    fn state(&self) -> GroupState {
        GroupState::Fusion(self.params.clone())
    }

    fn load_state(&mut self, state: GroupState) -> Result<(), PersistenceError> {
        let params = match state {
            GroupState::Fusion(p) => p,
            other => return Err(unexpected_state(ParamGroup::Fusion, &other)),
        };
        let g = ParamGroup::Fusion;
        check_dim(g, "total_dim", self.params.total_dim, params.total_dim)?;
        check_dim(g, "hidden_dim", self.params.hidden_dim, params.hidden_dim)?;
        check_dim(g, "num_actions", self.params.num_actions, params.num_actions)?;
        check_layout(g, &self.params.tensors(), &params.tensors())?;
        self.params = params;
        Ok(())
    }
}
