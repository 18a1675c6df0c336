/// Image encoder with an instruction-conditioned kernel.
///
/// Per frame:
///   a = relu(conv3x3/stride2(x))                 [C, H2, W2]
///   r = relu(conv3x3(a)) + a                      residual block
///   K = tanh(text @ W_kernel + b_kernel)          [C, C] per record
///   k = relu(K ⊛ r)                               1x1 conv with the text kernel
///   e = flatten(k) @ W_proj + b_proj              [image_emb_dim]
///
/// Frames are encoded independently, so encoding the newest frame alone gives
/// the same row as encoding it inside a full history.

use serde::{Deserialize, Serialize};

use crate::device::{Device, ExecutionContext};
use crate::error::PersistenceError;
use crate::submodule::{check_dim, check_layout, unexpected_state, Encode, GroupState, ParamGroup, SubModule};
use crate::tensor::{add_f32, conv2d_f32, conv_out_dim, linear_f32, relu_inplace, SimpleRng, Tensor};

pub const IMAGE_CHANNELS: usize = 3;

/// Layout (row-major):
///   w_conv1:  [C, 3, 3, 3]
///   w_res:    [C, C, 3, 3]
///   w_kernel: [text_dim, C*C]
///   w_proj:   [C*H2*W2, emb_dim]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageParams {
    pub height: usize,
    pub width: usize,
    pub conv_channels: usize,
    pub text_dim: usize,
    pub emb_dim: usize,
    pub w_conv1: Vec<f32>,
    pub b_conv1: Vec<f32>,
    pub w_res: Vec<f32>,
    pub b_res: Vec<f32>,
    pub w_kernel: Vec<f32>,
    pub b_kernel: Vec<f32>,
    pub w_proj: Vec<f32>,
    pub b_proj: Vec<f32>,
}

impl ImageParams {
    pub fn init(
        height: usize,
        width: usize,
        conv_channels: usize,
        text_dim: usize,
        emb_dim: usize,
        rng: &mut SimpleRng,
    ) -> Self {
        let c = conv_channels;
        let (h2, w2) = pooled_dims(height, width);
        let flat = c * h2 * w2;

        let w_conv1 = rng.uniform_vec(c * IMAGE_CHANNELS * 9, (1.0 / (IMAGE_CHANNELS * 9) as f32).sqrt());
        let w_res = rng.uniform_vec(c * c * 9, (1.0 / (c * 9) as f32).sqrt());
        let w_kernel = rng.uniform_vec(text_dim * c * c, (1.0 / text_dim as f32).sqrt());
        let w_proj = rng.uniform_vec(flat * emb_dim, (1.0 / flat as f32).sqrt());

        ImageParams {
            height,
            width,
            conv_channels,
            text_dim,
            emb_dim,
            w_conv1,
            b_conv1: vec![0.0; c],
            w_res,
            b_res: vec![0.0; c],
            w_kernel,
            b_kernel: vec![0.0; c * c],
            w_proj,
            b_proj: vec![0.0; emb_dim],
        }
    }

    fn tensors(&self) -> Vec<(&'static str, &[f32])> {
        vec![
            ("w_conv1", self.w_conv1.as_slice()),
            ("b_conv1", self.b_conv1.as_slice()),
            ("w_res", self.w_res.as_slice()),
            ("b_res", self.b_res.as_slice()),
            ("w_kernel", self.w_kernel.as_slice()),
            ("b_kernel", self.b_kernel.as_slice()),
            ("w_proj", self.w_proj.as_slice()),
            ("b_proj", self.b_proj.as_slice()),
        ]
    }
}

/// Spatial size after the stride-2 stem.
fn pooled_dims(height: usize, width: usize) -> (usize, usize) {
    (conv_out_dim(height, 3, 2, 1), conv_out_dim(width, 3, 2, 1))
}

/// Frames paired row-by-row with the instruction embedding that shapes their kernel.
pub struct ImageInput<'a> {
    pub frames: &'a [&'a Tensor],
    pub text: &'a [&'a [f32]],
}

pub struct ImageModule {
    params: ImageParams,
    device: Device,
}

impl ImageModule {
    pub fn new(
        height: usize,
        width: usize,
        conv_channels: usize,
        text_dim: usize,
        emb_dim: usize,
        rng: &mut SimpleRng,
        ctx: &ExecutionContext,
    ) -> Self {
        ImageModule {
            params: ImageParams::init(height, width, conv_channels, text_dim, emb_dim, rng),
            device: ctx.device(),
        }
    }

    /// Expected `[C, H, W]` of every input frame.
    pub fn frame_shape(&self) -> [usize; 3] {
        [IMAGE_CHANNELS, self.params.height, self.params.width]
    }

    /// Embed one `[3, H, W]` frame under one instruction embedding.
    pub fn encode_frame(&self, frame: &[f32], text: &[f32]) -> Vec<f32> {
        let p = &self.params;
        let c = p.conv_channels;
        let (h2, w2) = pooled_dims(p.height, p.width);
        let spatial = h2 * w2;
        debug_assert_eq!(frame.len(), IMAGE_CHANNELS * p.height * p.width);
        debug_assert_eq!(text.len(), p.text_dim);

        let mut a = vec![0.0f32; c * spatial];
        conv2d_f32(frame, &p.w_conv1, &p.b_conv1, &mut a, IMAGE_CHANNELS, p.height, p.width, c, 3, 2, 1);
        relu_inplace(&mut a);

        let mut res = vec![0.0f32; c * spatial];
        conv2d_f32(&a, &p.w_res, &p.b_res, &mut res, c, h2, w2, c, 3, 1, 1);
        relu_inplace(&mut res);
        let mut r = vec![0.0f32; c * spatial];
        add_f32(&res, &a, &mut r);

        let mut kernel = vec![0.0f32; c * c];
        linear_f32(text, &p.w_kernel, &p.b_kernel, &mut kernel);
        for v in kernel.iter_mut() {
            *v = v.tanh();
        }

        let mut k = vec![0.0f32; c * spatial];
        for co in 0..c {
            for ci in 0..c {
                let weight = kernel[co * c + ci];
                for s in 0..spatial {
                    k[co * spatial + s] += weight * r[ci * spatial + s];
                }
            }
        }
        relu_inplace(&mut k);

        let mut emb = vec![0.0f32; p.emb_dim];
        linear_f32(&k, &p.w_proj, &p.b_proj, &mut emb);
        emb
    }
}

impl Encode for ImageModule {
    type Input<'a> = ImageInput<'a>;

    fn output_dim(&self) -> usize {
        self.params.emb_dim
    }

    fn encode(&self, input: Self::Input<'_>) -> Tensor {
        assert_eq!(input.frames.len(), input.text.len(), "each frame needs an instruction embedding");
        let rows: Vec<Vec<f32>> = input
            .frames
            .iter()
            .zip(input.text)
            .map(|(frame, text)| self.encode_frame(&frame.data, text))
            .collect();
        Tensor::from_rows(&rows, self.params.emb_dim)
    }
}

impl SubModule for ImageModule {
    fn group(&self) -> ParamGroup {
        ParamGroup::Image
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
            ("w_conv1", p.w_conv1.as_mut_slice()),
            ("b_conv1", p.b_conv1.as_mut_slice()),
            ("w_res", p.w_res.as_mut_slice()),
            ("b_res", p.b_res.as_mut_slice()),
            ("w_kernel", p.w_kernel.as_mut_slice()),
            ("b_kernel", p.b_kernel.as_mut_slice()),
            ("w_proj", p.w_proj.as_mut_slice()),
            ("b_proj", p.b_proj.as_mut_slice()),
        ]
    }

    fn state(&self) -> GroupState {
        GroupState::Image(self.params.clone())
    }

    fn load_state(&mut self, state: GroupState) -> Result<(), PersistenceError> {
        let params = match state {
            GroupState::Image(p) => p,
            other => return Err(unexpected_state(ParamGroup::Image, &other)),
        };
        let g = ParamGroup::Image;
        check_dim(g, "height", self.params.height, params.height)?;
        check_dim(g, "width", self.params.width, params.width)?;
        check_dim(g, "conv_channels", self.params.conv_channels, params.conv_channels)?;
        check_dim(g, "text_dim", self.params.text_dim, params.text_dim)?;
        check_dim(g, "emb_dim", self.params.emb_dim, params.emb_dim)?;
        check_layout(g, &self.params.tensors(), &params.tensors())?;
        self.params = params;
        Ok(())
    }
}
