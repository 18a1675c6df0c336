//! Sub-module contract: parameter groups, persisted group state, and the
//! shared `encode` capability.
//!
//! Every trainable tensor in the model belongs to exactly one of five groups.
//! Each group is enumerated, persisted and synchronised as a unit.

use serde::{Deserialize, Serialize};

use crate::action_module::ActionParams;
use crate::device::Device;
use crate::error::PersistenceError;
use crate::fusion::FusionParams;
use crate::image_module::ImageParams;
use crate::lstm::LstmParams;
use crate::tensor::Tensor;
use crate::text_module::TextParams;

/// The five independently persisted parameter groups, in enumeration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamGroup {
    Image,
    ImageRecurrence,
    Text,
    Action,
    Fusion,
}

impl ParamGroup {
    pub const ALL: [ParamGroup; 5] = [
        ParamGroup::Image,
        ParamGroup::ImageRecurrence,
        ParamGroup::Text,
        ParamGroup::Action,
        ParamGroup::Fusion,
    ];

    /// File holding this group's state inside a model directory.
    pub fn file_name(self) -> &'static str {
        match self {
            ParamGroup::Image => "image_module_state.json",
            ParamGroup::ImageRecurrence => "image_recurrence_module_state.json",
            ParamGroup::Text => "text_module_state.json",
            ParamGroup::Action => "action_module_state.json",
            ParamGroup::Fusion => "final_module_state.json",
        }
    }

    pub fn index(self) -> usize {
        match self {
            ParamGroup::Image => 0,
            ParamGroup::ImageRecurrence => 1,
            ParamGroup::Text => 2,
            ParamGroup::Action => 3,
            ParamGroup::Fusion => 4,
        }
    }
}

impl std::fmt::Display for ParamGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamGroup::Image => "image",
            ParamGroup::ImageRecurrence => "image_recurrence",
            ParamGroup::Text => "text",
            ParamGroup::Action => "action",
            ParamGroup::Fusion => "fusion",
        };
        f.write_str(name)
    }
}

/// Owned snapshot of one group's parameters. This is both the persisted
/// payload and the unit copied through the parameter server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "group", content = "params")]
pub enum GroupState {
    Image(ImageParams),
    ImageRecurrence(LstmParams),
    Text(TextParams),
    Action(ActionParams),
    Fusion(FusionParams),
}

impl GroupState {
    pub fn group(&self) -> ParamGroup {
        match self {
            GroupState::Image(_) => ParamGroup::Image,
            GroupState::ImageRecurrence(_) => ParamGroup::ImageRecurrence,
            GroupState::Text(_) => ParamGroup::Text,
            GroupState::Action(_) => ParamGroup::Action,
            GroupState::Fusion(_) => ParamGroup::Fusion,
        }
    }

    /// Mutable tensors, in the same order the owning module lists them.
    pub fn tensors_mut(&mut self) -> Vec<&mut [f32]> {
        fn lstm(p: &mut LstmParams) -> [&mut [f32]; 3] {
            [p.w_ih.as_mut_slice(), p.w_hh.as_mut_slice(), p.b.as_mut_slice()]
        }
        match self {
            GroupState::Image(p) => vec![
                p.w_conv1.as_mut_slice(),
                p.b_conv1.as_mut_slice(),
                p.w_res.as_mut_slice(),
                p.b_res.as_mut_slice(),
                p.w_kernel.as_mut_slice(),
                p.b_kernel.as_mut_slice(),
                p.w_proj.as_mut_slice(),
                p.b_proj.as_mut_slice(),
            ],
            GroupState::ImageRecurrence(p) => lstm(p).into(),
            GroupState::Text(TextParams::Simple(p)) => {
                let mut out = vec![p.w_embed.as_mut_slice()];
                out.extend(lstm(&mut p.lstm));
                out
            }
            GroupState::Text(TextParams::Pointer(p)) => {
                let mut out = vec![p.w_embed.as_mut_slice()];
                out.extend(lstm(&mut p.forward));
                out.extend(lstm(&mut p.backward));
                out
            }
            GroupState::Action(p) => vec![p.w_embed.as_mut_slice()],
            GroupState::Fusion(p) => vec![
                p.w1.as_mut_slice(),
                p.b1.as_mut_slice(),
                p.w2.as_mut_slice(),
                p.b2.as_mut_slice(),
            ],
        }
    }
}

/// Named view of one trainable tensor.
#[derive(Clone, Copy, Debug)]
pub struct ParameterRef<'a> {
    pub group: ParamGroup,
    pub name: &'static str,
    pub data: &'a [f32],
}

/// Mutable view of one trainable tensor, for optimiser updates.
#[derive(Debug)]
pub struct ParameterMut<'a> {
    pub group: ParamGroup,
    pub name: &'static str,
    pub data: &'a mut [f32],
}

/// An independently parameterised, independently persistable block.
pub trait SubModule {
    fn group(&self) -> ParamGroup;

    /// Device the module's parameters were placed on at construction.
    fn device(&self) -> Device;

    /// Trainable tensors in a fixed order.
    fn tensors(&self) -> Vec<(&'static str, &[f32])>;

    /// Same tensors and order as `tensors`, mutably.
    fn tensors_mut(&mut self) -> Vec<(&'static str, &mut [f32])>;

    fn num_params(&self) -> usize {
        self.tensors().iter().map(|(_, t)| t.len()).sum()
    }

    fn state(&self) -> GroupState;

    /// Replace parameters with `state`. Rejects another group's state or a
    /// tensor layout that differs from the module's own; on error the module
    /// is left unchanged.
    fn load_state(&mut self, state: GroupState) -> Result<(), PersistenceError>;
}

/// `encode(batch) -> embedding batch`, with a modality-specific input.
/// Output is `[batch, output_dim]`.
pub trait Encode {
    type Input<'a>;

    fn output_dim(&self) -> usize;

    fn encode(&self, input: Self::Input<'_>) -> Tensor;
}

pub(crate) fn unexpected_state(expected: ParamGroup, found: &GroupState) -> PersistenceError {
    PersistenceError::StateMismatch {
        group: expected,
        reason: format!("received state for the {} group", found.group()),
    }
}

/// Compare two tensor layouts name-by-name and length-by-length.
pub(crate) fn check_layout(
    group: ParamGroup,
    expected: &[(&'static str, &[f32])],
    found: &[(&'static str, &[f32])],
) -> Result<(), PersistenceError> {
    if expected.len() != found.len() {
        return Err(PersistenceError::StateMismatch {
            group,
            reason: format!("expected {} tensors, found {}", expected.len(), found.len()),
        });
    }
    for ((name, want), (found_name, got)) in expected.iter().zip(found) {
        if name != found_name || want.len() != got.len() {
            return Err(PersistenceError::StateMismatch {
                group,
                reason: format!(
                    "tensor {name} expects {} values, found {found_name} with {}",
                    want.len(),
                    got.len()
                ),
            });
        }
    }
    Ok(())
}

pub(crate) fn check_dim(group: ParamGroup, name: &str, expected: usize, found: usize) -> Result<(), PersistenceError> {
    if expected != found {
        return Err(PersistenceError::StateMismatch {
            group,
            reason: format!("{name} is {found}, model expects {expected}"),
        });
    }
    Ok(())
}
