//! Instruction encoders.
//!
//! Two variants share one contract and are chosen once at model construction:
//! - Simple: word embeddings → LSTM, final hidden state (`lstm_emb_dim`).
//! - Pointer: word embeddings → forward and backward LSTMs; the embedding is
//!   the concatenation of both directions at the first and last token of the
//!   read-pointer span (`4 * lstm_emb_dim`).

use serde::{Deserialize, Serialize};

use crate::device::{Device, ExecutionContext};
use crate::error::PersistenceError;
use crate::image_recurrence::{lstm_tensors, lstm_tensors_mut};
use crate::lstm::{lstm_step, lstm_unroll, LstmParams, LstmState};
use crate::observation::ReadPointer;
use crate::submodule::{check_dim, check_layout, unexpected_state, Encode, GroupState, ParamGroup, SubModule};
use crate::tensor::{SimpleRng, Tensor};

/// One instruction and the span the pointer encoder reads.
#[derive(Clone, Copy, Debug)]
pub struct TextInput<'a> {
    pub tokens: &'a [usize],
    pub pointer: ReadPointer,
}

/// Layout: w_embed [vocab_size, word_dim].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextSimpleParams {
    pub vocab_size: usize,
    pub word_dim: usize,
    pub w_embed: Vec<f32>,
    pub lstm: LstmParams,
}

/// Layout: w_embed [vocab_size, word_dim]; two LSTMs of the same shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextPointerParams {
    pub vocab_size: usize,
    pub word_dim: usize,
    pub w_embed: Vec<f32>,
    pub forward: LstmParams,
    pub backward: LstmParams,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TextParams {
    Simple(TextSimpleParams),
    Pointer(TextPointerParams),
}

fn embed_row(w_embed: &[f32], word_dim: usize, vocab_size: usize, token: usize) -> &[f32] {
    assert!(token < vocab_size, "token {token} out of range for vocab {vocab_size}");
    &w_embed[token * word_dim..(token + 1) * word_dim]
}

pub struct TextSimpleModule {
    params: TextSimpleParams,
}

impl TextSimpleModule {
    pub fn new(word_dim: usize, hidden_dim: usize, vocab_size: usize, rng: &mut SimpleRng) -> Self {
        let w_embed = rng.uniform_vec(vocab_size * word_dim, 1.0);
        let lstm = LstmParams::init(word_dim, hidden_dim, rng);
        TextSimpleModule {
            params: TextSimpleParams { vocab_size, word_dim, w_embed, lstm },
        }
    }

    pub fn encode_one(&self, tokens: &[usize]) -> Vec<f32> {
        let p = &self.params;
        let mut state = LstmState::zeros(p.lstm.hidden_dim);
        for &tok in tokens {
            state = lstm_step(&p.lstm, embed_row(&p.w_embed, p.word_dim, p.vocab_size, tok), &state);
        }
        state.h
    }

    fn tensors(&self) -> Vec<(&'static str, &[f32])> {
        let mut out = vec![("w_embed", self.params.w_embed.as_slice())];
        out.extend(lstm_tensors(&self.params.lstm));
        out
    }
}

pub struct TextPointerModule {
    params: TextPointerParams,
}

impl TextPointerModule {
    pub fn new(word_dim: usize, hidden_dim: usize, vocab_size: usize, rng: &mut SimpleRng) -> Self {
        let w_embed = rng.uniform_vec(vocab_size * word_dim, 1.0);
        let forward = LstmParams::init(word_dim, hidden_dim, rng);
        let backward = LstmParams::init(word_dim, hidden_dim, rng);
        TextPointerModule {
            params: TextPointerParams { vocab_size, word_dim, w_embed, forward, backward },
        }
    }

    pub fn encode_one(&self, tokens: &[usize], pointer: ReadPointer) -> Vec<f32> {
        let p = &self.params;
        let hd = p.forward.hidden_dim;
        debug_assert!(pointer.start < pointer.end && pointer.end <= tokens.len());

        let words: Vec<&[f32]> = tokens
            .iter()
            .map(|&tok| embed_row(&p.w_embed, p.word_dim, p.vocab_size, tok))
            .collect();
        let fwd = lstm_unroll(&p.forward, &words, &LstmState::zeros(hd));
        let reversed: Vec<&[f32]> = words.iter().rev().copied().collect();
        let mut bwd = lstm_unroll(&p.backward, &reversed, &LstmState::zeros(hd));
        // index bwd by token position
        bwd.reverse();

        let first = pointer.start;
        let last = pointer.end - 1;
        let mut out = Vec::with_capacity(4 * hd);
        out.extend_from_slice(&fwd[first].h);
        out.extend_from_slice(&bwd[first].h);
        out.extend_from_slice(&fwd[last].h);
        out.extend_from_slice(&bwd[last].h);
        out
    }

    fn tensors(&self) -> Vec<(&'static str, &[f32])> {
        let p = &self.params;
        vec![
            ("w_embed", p.w_embed.as_slice()),
            ("forward.w_ih", p.forward.w_ih.as_slice()),
            ("forward.w_hh", p.forward.w_hh.as_slice()),
            ("forward.b", p.forward.b.as_slice()),
            ("backward.w_ih", p.backward.w_ih.as_slice()),
            ("backward.w_hh", p.backward.w_hh.as_slice()),
            ("backward.b", p.backward.b.as_slice()),
        ]
    }
}

/// Instruction encoder selected from `use_pointer_model`.
pub enum TextModule {
    Simple(TextSimpleModule),
    Pointer(TextPointerModule),
}

pub struct TextEncoder {
    inner: TextModule,
    hidden_dim: usize,
    device: Device,
}

impl TextEncoder {
    pub fn new(
        use_pointer_model: bool,
        word_dim: usize,
        hidden_dim: usize,
        vocab_size: usize,
        rng: &mut SimpleRng,
        ctx: &ExecutionContext,
    ) -> Self {
        let inner = if use_pointer_model {
            TextModule::Pointer(TextPointerModule::new(word_dim, hidden_dim, vocab_size, rng))
        } else {
            TextModule::Simple(TextSimpleModule::new(word_dim, hidden_dim, vocab_size, rng))
        };
        TextEncoder { inner, hidden_dim, device: ctx.device() }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.inner, TextModule::Pointer(_))
    }

    pub fn encode_one(&self, input: &TextInput<'_>) -> Vec<f32> {
        match &self.inner {
            TextModule::Simple(m) => m.encode_one(input.tokens),
            TextModule::Pointer(m) => m.encode_one(input.tokens, input.pointer),
        }
    }
}

impl Encode for TextEncoder {
    type Input<'a> = &'a [TextInput<'a>];

    fn output_dim(&self) -> usize {
        if self.is_pointer() {
            4 * self.hidden_dim
        } else {
            self.hidden_dim
        }
    }

    fn encode(&self, input: Self::Input<'_>) -> Tensor {
        let rows: Vec<Vec<f32>> = input.iter().map(|t| self.encode_one(t)).collect();
        Tensor::from_rows(&rows, self.output_dim())
    }
}

impl SubModule for TextEncoder {
    fn group(&self) -> ParamGroup {
        ParamGroup::Text
    }

    fn device(&self) -> Device {
        self.device
    }

    fn tensors(&self) -> Vec<(&'static str, &[f32])> {
        match &self.inner {
            TextModule::Simple(m) => m.tensors(),
            TextModule::Pointer(m) => m.tensors(),
        }
    }

    fn tensors_mut(&mut self) -> Vec<(&'static str, &mut [f32])> {
        match &mut self.inner {
            TextModule::Simple(m) => {
                let mut out = vec![("w_embed", m.params.w_embed.as_mut_slice())];
                out.extend(lstm_tensors_mut(&mut m.params.lstm));
                out
            }
            TextModule::Pointer(m) => {
                let p = &mut m.params;
                vec![
                    ("w_embed", p.w_embed.as_mut_slice()),
                    ("forward.w_ih", p.forward.w_ih.as_mut_slice()),
                    ("forward.w_hh", p.forward.w_hh.as_mut_slice()),
                    ("forward.b", p.forward.b.as_mut_slice()),
                    ("backward.w_ih", p.backward.w_ih.as_mut_slice()),
                    ("backward.w_hh", p.backward.w_hh.as_mut_slice()),
                    ("backward.b", p.backward.b.as_mut_slice()),
                ]
            }
        }
    }

    fn state(&self) -> GroupState {
        let params = match &self.inner {
            TextModule::Simple(m) => TextParams::Simple(m.params.clone()),
            TextModule::Pointer(m) => TextParams::Pointer(m.params.clone()),
        };
        GroupState::Text(params)
    }

    fn load_state(&mut self, state: GroupState) -> Result<(), PersistenceError> {
        let g = ParamGroup::Text;
        let is_pointer = self.is_pointer();
        let params = match state {
            GroupState::Text(p) => p,
            other => return Err(unexpected_state(g, &other)),
        };
        match (&mut self.inner, params) {
            (TextModule::Simple(m), TextParams::Simple(p)) => {
                check_dim(g, "vocab_size", m.params.vocab_size, p.vocab_size)?;
                check_dim(g, "word_dim", m.params.word_dim, p.word_dim)?;
                check_dim(g, "hidden_dim", m.params.lstm.hidden_dim, p.lstm.hidden_dim)?;
                let incoming = TextSimpleModule { params: p };
                check_layout(g, &m.tensors(), &incoming.tensors())?;
                *m = incoming;
            }
            (TextModule::Pointer(m), TextParams::Pointer(p)) => {
                check_dim(g, "vocab_size", m.params.vocab_size, p.vocab_size)?;
                check_dim(g, "word_dim", m.params.word_dim, p.word_dim)?;
                check_dim(g, "hidden_dim", m.params.forward.hidden_dim, p.forward.hidden_dim)?;
                let incoming = TextPointerModule { params: p };
                check_layout(g, &m.tensors(), &incoming.tensors())?;
                *m = incoming;
            }
            _ => {
                let (want, got) = if is_pointer { ("pointer", "simple") } else { ("simple", "pointer") };
                return Err(PersistenceError::StateMismatch {
                    group: g,
                    reason: format!("model uses the {want} instruction encoder, state is {got}"),
                });
            }
        }
        Ok(())
    }
}
