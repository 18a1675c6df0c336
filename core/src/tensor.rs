/// Minimal tensor utilities for the policy model.
///
/// All operations are free functions on flat f32 slices with explicit dimensions.
/// Row-major layout throughout. Images are `[C, H, W]`, embedding batches `[B, D]`.

use serde::{Deserialize, Serialize};

/// Flat f32 tensor with shape metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Self {
        let n: usize = shape.iter().product();
        Tensor {
            data: vec![0.0; n],
            shape: shape.to_vec(),
        }
    }

    /// Wrap an existing buffer. Panics if `data` does not match `shape`.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Self {
        let n: usize = shape.iter().product();
        assert_eq!(data.len(), n, "tensor data length {} != shape product {n}", data.len());
        Tensor { data, shape: shape.to_vec() }
    }

    /// Stack equal-length rows into a `[rows.len(), width]` batch.
    pub fn from_rows(rows: &[Vec<f32>], width: usize) -> Self {
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            assert_eq!(row.len(), width, "row width {} != {width}", row.len());
            data.extend_from_slice(row);
        }
        Tensor { data, shape: vec![rows.len(), width] }
    }

    /// Row `i` of a 2-D tensor.
    pub fn row(&self, i: usize) -> &[f32] {
        debug_assert_eq!(self.shape.len(), 2);
        let width = self.shape[1];
        &self.data[i * width..(i + 1) * width]
    }

    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }
}

// ── Free-function math ops on flat slices ────────────────────────────

/// Matrix multiply: C[M,N] = A[M,K] @ B[K,N].  Row-major.
/// `out` must be pre-allocated with M*N elements (will be overwritten).
pub fn matmul_f32(a: &[f32], b: &[f32], out: &mut [f32], m: usize, k: usize, n: usize) {
    debug_assert_eq!(a.len(), m * k);
    debug_assert_eq!(b.len(), k * n);
    debug_assert_eq!(out.len(), m * n);

    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for p in 0..k {
                sum += a[i * k + p] * b[p * n + j];
            }
            out[i * n + j] = sum;
        }
    }
}

/// Affine map for a single row: out[N] = x[K] @ W[K,N] + b[N].
pub fn linear_f32(x: &[f32], w: &[f32], b: &[f32], out: &mut [f32]) {
    let k = x.len();
    let n = out.len();
    debug_assert_eq!(w.len(), k * n);
    debug_assert_eq!(b.len(), n);

    matmul_f32(x, w, out, 1, k, n);
    for j in 0..n {
        out[j] += b[j];
    }
}

/// Row-wise softmax: each row of length `cols` in `scores` gets softmaxed into `out`.
/// `rows` * `cols` elements.
pub fn softmax_f32(scores: &[f32], out: &mut [f32], rows: usize, cols: usize) {
    debug_assert_eq!(scores.len(), rows * cols);
    debug_assert_eq!(out.len(), rows * cols);

    for r in 0..rows {
        let base = r * cols;
        let row = &scores[base..base + cols];

        // Numerically stable: subtract max
        let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum_exp = 0.0f32;
        for c in 0..cols {
            let e = (row[c] - max_val).exp();
            out[base + c] = e;
            sum_exp += e;
        }
        if sum_exp > 0.0 {
            for c in 0..cols {
                out[base + c] /= sum_exp;
            }
        }
    }
}

/// Element-wise add: out[i] = a[i] + b[i].
pub fn add_f32(a: &[f32], b: &[f32], out: &mut [f32]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), out.len());
    for i in 0..a.len() {
        out[i] = a[i] + b[i];
    }
}

/// In-place ReLU.
pub fn relu_inplace(buf: &mut [f32]) {
    for v in buf.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}

/// Sigmoid: 1 / (1 + exp(-x)). Clamped to avoid overflow.
#[inline]
pub fn sigmoid_f32(x: f32) -> f32 {
    if x >= 15.0 { return 1.0; }
    if x <= -15.0 { return 0.0; }
    1.0 / (1.0 + (-x).exp())
}

/// Output spatial size of a square convolution.
#[inline]
pub fn conv_out_dim(input: usize, kernel: usize, stride: usize, pad: usize) -> usize {
    (input + 2 * pad - kernel) / stride + 1
}

/// 2-D convolution with a square kernel and zero padding.
///
/// `x`: [C_in, H, W], `w`: [C_out, C_in, K, K], `b`: [C_out],
/// `out`: [C_out, H_out, W_out] (will be overwritten).
pub fn conv2d_f32(
    x: &[f32],
    w: &[f32],
    b: &[f32],
    out: &mut [f32],
    c_in: usize,
    h: usize,
    w_in: usize,
    c_out: usize,
    kernel: usize,
    stride: usize,
    pad: usize,
) {
    let h_out = conv_out_dim(h, kernel, stride, pad);
    let w_out = conv_out_dim(w_in, kernel, stride, pad);
    debug_assert_eq!(x.len(), c_in * h * w_in);
    debug_assert_eq!(w.len(), c_out * c_in * kernel * kernel);
    debug_assert_eq!(b.len(), c_out);
    debug_assert_eq!(out.len(), c_out * h_out * w_out);

    for co in 0..c_out {
        for oy in 0..h_out {
            for ox in 0..w_out {
                let mut sum = b[co];
                for ci in 0..c_in {
                    for ky in 0..kernel {
                        let iy = (oy * stride + ky) as isize - pad as isize;
                        if iy < 0 || iy >= h as isize {
                            continue;
                        }
                        for kx in 0..kernel {
                            let ix = (ox * stride + kx) as isize - pad as isize;
                            if ix < 0 || ix >= w_in as isize {
                                continue;
                            }
                            let xv = x[(ci * h + iy as usize) * w_in + ix as usize];
                            let wv = w[((co * c_in + ci) * kernel + ky) * kernel + kx];
                            sum += xv * wv;
                        }
                    }
                }
                out[(co * h_out + oy) * w_out + ox] = sum;
            }
        }
    }
}

/// Simple xorshift64 PRNG for deterministic weight init and dropout masks. Not crypto-safe.
#[derive(Clone, Debug)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        SimpleRng { state: seed.max(1) } // avoid zero state
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform in [0, 1].
    pub fn unit(&mut self) -> f32 {
        ((self.next_u64() as f64) / (u64::MAX as f64)) as f32
    }

    /// Uniform in [-scale, scale].
    pub fn uniform(&mut self, scale: f32) -> f32 {
        (2.0 * self.unit() - 1.0) * scale
    }

    /// Fill slice with uniform random values in [-scale, scale].
    pub fn fill_uniform(&mut self, buf: &mut [f32], scale: f32) {
        for v in buf.iter_mut() {
            *v = self.uniform(scale);
        }
    }

    /// Vector of `len` uniform values in [-scale, scale].
    pub fn uniform_vec(&mut self, len: usize, scale: f32) -> Vec<f32> {
        let mut buf = vec![0.0f32; len];
        self.fill_uniform(&mut buf, scale);
        buf
    }
}
