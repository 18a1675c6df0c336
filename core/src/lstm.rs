//! Single-layer LSTM cell shared by the image recurrence and instruction encoders.
//!
//! Gate order in the fused projections is input, forget, cell, output.
//! Layout (row-major):
//!   w_ih: [input_dim, 4*hidden_dim]
//!   w_hh: [hidden_dim, 4*hidden_dim]
//!   b:    [4*hidden_dim]

use serde::{Deserialize, Serialize};

use crate::tensor::{matmul_f32, sigmoid_f32, SimpleRng};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LstmParams {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub w_ih: Vec<f32>,
    pub w_hh: Vec<f32>,
    pub b: Vec<f32>,
}

impl LstmParams {
    /// Uniform init in [-1/sqrt(h), 1/sqrt(h)], forget-gate bias at 1.
    pub fn init(input_dim: usize, hidden_dim: usize, rng: &mut SimpleRng) -> Self {
        let scale = (1.0 / hidden_dim as f32).sqrt();
        let w_ih = rng.uniform_vec(input_dim * 4 * hidden_dim, scale);
        let w_hh = rng.uniform_vec(hidden_dim * 4 * hidden_dim, scale);
        let mut b = vec![0.0f32; 4 * hidden_dim];
        for v in &mut b[hidden_dim..2 * hidden_dim] {
            *v = 1.0;
        }
        LstmParams { input_dim, hidden_dim, w_ih, w_hh, b }
    }

    pub fn num_params(&self) -> usize {
        self.w_ih.len() + self.w_hh.len() + self.b.len()
    }
}

/// Hidden and cell vectors carried between steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LstmState {
    pub h: Vec<f32>,
    pub c: Vec<f32>,
}

impl LstmState {
    pub fn zeros(hidden_dim: usize) -> Self {
        LstmState {
            h: vec![0.0; hidden_dim],
            c: vec![0.0; hidden_dim],
        }
    }
}

/// One LSTM step: consumes `x` and the previous state, returns the next state.
pub fn lstm_step(params: &LstmParams, x: &[f32], prev: &LstmState) -> LstmState {
    let hd = params.hidden_dim;
    debug_assert_eq!(x.len(), params.input_dim);
    debug_assert_eq!(prev.h.len(), hd);

    let mut gates = vec![0.0f32; 4 * hd];
    let mut recur = vec![0.0f32; 4 * hd];
    matmul_f32(x, &params.w_ih, &mut gates, 1, params.input_dim, 4 * hd);
    matmul_f32(&prev.h, &params.w_hh, &mut recur, 1, hd, 4 * hd);

    let mut h = vec![0.0f32; hd];
    let mut c = vec![0.0f32; hd];
    for j in 0..hd {
        let i_g = sigmoid_f32(gates[j] + recur[j] + params.b[j]);
        let f_g = sigmoid_f32(gates[hd + j] + recur[hd + j] + params.b[hd + j]);
        let g_g = (gates[2 * hd + j] + recur[2 * hd + j] + params.b[2 * hd + j]).tanh();
        let o_g = sigmoid_f32(gates[3 * hd + j] + recur[3 * hd + j] + params.b[3 * hd + j]);
        c[j] = f_g * prev.c[j] + i_g * g_g;
        h[j] = o_g * c[j].tanh();
    }
    LstmState { h, c }
}

/// Run the cell over `inputs` from `init`, returning every intermediate state.
pub fn lstm_unroll(params: &LstmParams, inputs: &[&[f32]], init: &LstmState) -> Vec<LstmState> {
    let mut states = Vec::with_capacity(inputs.len());
    let mut state = init.clone();
    for x in inputs {
        state = lstm_step(params, x, &state);
        states.push(state.clone());
    }
    states
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_shapes_and_bounds() {
        let mut rng = SimpleRng::new(7);
        let params = LstmParams::init(3, 5, &mut rng);
        let next = lstm_step(&params, &[0.1, -0.2, 0.3], &LstmState::zeros(5));
        assert_eq!(next.h.len(), 5);
        assert_eq!(next.c.len(), 5);
        // h = o * tanh(c) is bounded by 1 in magnitude
        assert!(next.h.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_unroll_matches_repeated_steps() {
        let mut rng = SimpleRng::new(11);
        let params = LstmParams::init(2, 4, &mut rng);
        let xs: Vec<Vec<f32>> = (0..4).map(|t| vec![t as f32 * 0.1, 1.0 - t as f32 * 0.2]).collect();
        let refs: Vec<&[f32]> = xs.iter().map(|x| x.as_slice()).collect();
        let unrolled = lstm_unroll(&params, &refs, &LstmState::zeros(4));

        let mut state = LstmState::zeros(4);
        for x in &xs {
            state = lstm_step(&params, x, &state);
        }
        assert_eq!(unrolled.last().unwrap(), &state);
    }

    #[test]
    fn test_forget_bias_init() {
        let mut rng = SimpleRng::new(3);
        let params = LstmParams::init(2, 3, &mut rng);
        assert_eq!(&params.b[3..6], &[1.0, 1.0, 1.0]);
        assert_eq!(params.num_params(), 2 * 12 + 3 * 12 + 12);
    }
}
