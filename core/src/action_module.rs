/// Previous-action encoder: a lookup table with one extra row for the
/// reserved no-op index (`num_actions`).
///
/// Layout: w_embed [num_actions + 1, action_emb_dim], row-major.

use serde::{Deserialize, Serialize};

use crate::device::{Device, ExecutionContext};
use crate::error::PersistenceError;
use crate::submodule::{check_dim, check_layout, unexpected_state, Encode, GroupState, ParamGroup, SubModule};
use crate::tensor::{SimpleRng, Tensor};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionParams {
    pub num_actions: usize,
    pub emb_dim: usize,
    pub w_embed: Vec<f32>,
}

impl ActionParams {
    pub fn init(num_actions: usize, emb_dim: usize, rng: &mut SimpleRng) -> Self {
        let w_embed = rng.uniform_vec((num_actions + 1) * emb_dim, 1.0);
        ActionParams { num_actions, emb_dim, w_embed }
    }

    fn tensors(&self) -> Vec<(&'static str, &[f32])> {
        vec![("w_embed", self.w_embed.as_slice())]
    }
}

pub struct ActionModule {
    params: ActionParams,
    device: Device,
}

impl ActionModule {
    pub fn new(num_actions: usize, emb_dim: usize, rng: &mut SimpleRng, ctx: &ExecutionContext) -> Self {
        ActionModule {
            params: ActionParams::init(num_actions, emb_dim, rng),
            device: ctx.device(),
        }
    }

    /// Embedding row for one action index. Index must be <= num_actions.
    pub fn embed(&self, action: usize) -> &[f32] {
        assert!(
            action <= self.params.num_actions,
            "action {action} out of range for {} actions",
            self.params.num_actions
        );
        let d = self.params.emb_dim;
        &self.params.w_embed[action * d..(action + 1) * d]
    }
}

impl Encode for ActionModule {
    /// Previous-action indices, already no-op substituted.
    type Input<'a> = &'a [usize];

    fn output_dim(&self) -> usize {
        self.params.emb_dim
    }

    fn encode(&self, actions: Self::Input<'_>) -> Tensor {
        let rows: Vec<Vec<f32>> = actions.iter().map(|&a| self.embed(a).to_vec()).collect();
        Tensor::from_rows(&rows, self.params.emb_dim)
    }
}

impl SubModule for ActionModule {
    fn group(&self) -> ParamGroup {
        ParamGroup::Action
    }

    fn device(&self) -> Device {
        self.device
    }

    fn tensors(&self) -> Vec<(&'static str, &[f32])> {
        self.params.tensors()
    }

    fn tensors_mut(&mut self) -> Vec<(&'static str, &mut [f32])> {
        vec![("w_embed", self.params.w_embed.as_mut_slice())]
    }

    fn state(&self) -> GroupState {
        GroupState::Action(self.params.clone())
    }

    fn load_state(&mut self, state: GroupState) -> Result<(), PersistenceError> {
        let params = match state {
            GroupState::Action(p) => p,
            other => return Err(unexpected_state(ParamGroup::Action, &other)),
        };
        check_dim(ParamGroup::Action, "num_actions", self.params.num_actions, params.num_actions)?;
        check_dim(ParamGroup::Action, "emb_dim", self.params.emb_dim, params.emb_dim)?;
        check_layout(ParamGroup::Action, &self.params.tensors(), &params.tensors())?;
        self.params = params;
        Ok(())
    }
}
