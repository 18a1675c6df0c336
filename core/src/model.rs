/// Incremental multimodal policy model.
///
/// Owns the four encoders and the fusion head, exposes batched (full-history)
/// and single-step (carry-threaded) inference, and presents all trainable
/// tensors as five parameter groups in a fixed order:
/// image, image recurrence, text, action, fusion.

use crate::action_module::ActionModule;
use crate::config::{validate_setup, PolicyConfig, PolicyConstants};
use crate::device::{DevicePreference, ExecutionContext};
use crate::error::{PersistenceError, PolicyError};
use crate::fusion::{
    ActionDistribution, Encoders, FullHistoryBatch, FusionModule, InferenceMode, RecurrentCarry, StepBatch,
    StepOutput,
};
use crate::image_module::ImageModule;
use crate::image_recurrence::ImageRecurrenceModule;
use crate::observation::ObservationRecord;
use crate::submodule::{GroupState, ParamGroup, ParameterMut, ParameterRef, SubModule};
use crate::tensor::{SimpleRng, Tensor};
use crate::text_module::{TextEncoder, TextInput};

pub struct IncrementalPolicyModel {
    config: PolicyConfig,
    constants: PolicyConstants,
    ctx: ExecutionContext,
    encoders: Encoders,
    fusion: FusionModule,
}

impl IncrementalPolicyModel {
    /// Build a model, placing it on an accelerator when one is available.
    pub fn new(config: PolicyConfig, constants: PolicyConstants) -> Result<Self, PolicyError> {
        let ctx = ExecutionContext::resolve(DevicePreference::Accelerator);
        Self::with_context(config, constants, ctx)
    }

    /// Build a model on an already-resolved execution context.
    /// Parameters are initialised from `config.seed` in group order, so two
    /// models built from the same config start identical.
    pub fn with_context(
        config: PolicyConfig,
        constants: PolicyConstants,
        ctx: ExecutionContext,
    ) -> Result<Self, PolicyError> {
        validate_setup(&config, &constants)?;
        let mut rng = SimpleRng::new(config.seed);
        let text_dim = constants.text_emb_dim(config.use_pointer_model);

        let image = ImageModule::new(
            config.image_height,
            config.image_width,
            constants.image_conv_channels,
            text_dim,
            constants.image_emb_dim,
            &mut rng,
            &ctx,
        );
        let image_recurrence =
            ImageRecurrenceModule::new(constants.image_emb_dim, constants.image_emb_dim, &mut rng, &ctx);
        let text = TextEncoder::new(
            config.use_pointer_model,
            constants.word_emb_dim,
            constants.lstm_emb_dim,
            config.vocab_size,
            &mut rng,
            &ctx,
        );
        let action = ActionModule::new(config.num_actions, constants.action_emb_dim, &mut rng, &ctx);
        let fusion = FusionModule::new(
            constants.total_emb_dim(config.use_pointer_model),
            constants.fusion_hidden_dim,
            config.num_actions,
            constants.fusion_dropout,
            &mut rng,
            &ctx,
        );

        let model = IncrementalPolicyModel {
            config,
            constants,
            ctx,
            encoders: Encoders { image, image_recurrence, text, action },
            fusion,
        };
        tracing::info!(
            device = %model.ctx.device(),
            pointer = model.config.use_pointer_model,
            params = model.num_params(),
            "policy model created"
        );
        for (group, count) in model.params_per_group() {
            tracing::debug!(%group, count, "parameter group");
        }
        Ok(model)
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn constants(&self) -> &PolicyConstants {
        &self.constants
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn image_module(&self) -> &ImageModule {
        &self.encoders.image
    }

    pub fn text_module(&self) -> &TextEncoder {
        &self.encoders.text
    }

    fn validate_record(&self, record: &ObservationRecord) -> Result<(), PolicyError> {
        let expected = self.encoders.image.frame_shape();
        // all frames share a shape by construction
        if record.last_image().shape != expected {
            return Err(PolicyError::ImageShapeMismatch {
                expected,
                found: record.last_image().shape.clone(),
            });
        }
        if let Some(&token) = record.instruction().iter().find(|&&t| t >= self.config.vocab_size) {
            return Err(PolicyError::TokenOutOfRange { token, vocab_size: self.config.vocab_size });
        }
        if let Some(action) = record.previous_action() {
            if action > self.config.none_action() {
                return Err(PolicyError::ActionOutOfRange { action, num_actions: self.config.num_actions });
            }
        }
        record.read_pointer().check(record.instruction().len())
    }

    fn previous_action_index(&self, record: &ObservationRecord) -> usize {
        record.previous_action().unwrap_or(self.config.none_action())
    }

    /// Full-history inference over a batch of records.
    ///
    /// Records are processed in descending instruction length, but the result
    /// is returned in input order: `out[i]` belongs to `records[i]`.
    pub fn get_probs_batch(
        &self,
        records: &[ObservationRecord],
        mode: InferenceMode,
    ) -> Result<Vec<ActionDistribution>, PolicyError> {
        if records.is_empty() {
            return Err(PolicyError::EmptyBatch);
        }
        for record in records {
            self.validate_record(record)?;
        }

        // stable sort keeps equal-length records in input order
        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by(|&a, &b| records[b].instruction().len().cmp(&records[a].instruction().len()));

        let max_len = records.iter().map(ObservationRecord::num_images).max().unwrap_or(1);
        let blank = Tensor::zeros(&self.encoders.image.frame_shape());

        let mut frames: Vec<&Tensor> = Vec::with_capacity(records.len() * max_len);
        let mut lengths = Vec::with_capacity(records.len());
        let mut text = Vec::with_capacity(records.len());
        let mut frame_text = Vec::with_capacity(records.iter().map(ObservationRecord::num_images).sum());
        let mut actions = Vec::with_capacity(records.len());
        for &i in &order {
            let record = &records[i];
            frames.extend(record.image_history().take(max_len));
            frames.extend(std::iter::repeat(&blank).take(max_len - record.num_images()));
            lengths.push(record.num_images());
            text.push(TextInput { tokens: record.instruction(), pointer: record.read_pointer() });
            frame_text.extend(
                record.frame_pointers().iter().map(|&pointer| TextInput { tokens: record.instruction(), pointer }),
            );
            actions.push(self.previous_action_index(record));
        }

        let sorted = self.fusion.forward_full(
            &self.encoders,
            &FullHistoryBatch {
                frames: &frames,
                lengths: &lengths,
                max_len,
                text: &text,
                frame_text: &frame_text,
                actions: &actions,
                row_ids: &order,
            },
            mode,
        );

        let mut out = vec![ActionDistribution::from_probs(Vec::new()); records.len()];
        for (pos, dist) in sorted.into_iter().enumerate() {
            out[order[pos]] = dist;
        }
        Ok(out)
    }

    /// Single-step inference: encodes only the newest image and advances
    /// `carry` (None at episode start). Thread the returned carry into the
    /// next call of the same episode.
    pub fn get_probs(
        &self,
        record: &ObservationRecord,
        carry: Option<&RecurrentCarry>,
        mode: InferenceMode,
    ) -> Result<StepOutput, PolicyError> {
        self.validate_record(record)?;
        let frames = [record.last_image()];
        let text = [TextInput { tokens: record.instruction(), pointer: record.read_pointer() }];
        let actions = [self.previous_action_index(record)];
        let carries = [carry];
        let mut outputs = self.fusion.forward_step(
            &self.encoders,
            &StepBatch { frames: &frames, text: &text, actions: &actions, carries: &carries },
            mode,
        )?;
        Ok(outputs.swap_remove(0))
    }

    pub fn submodule(&self, group: ParamGroup) -> &dyn SubModule {
        match group {
            ParamGroup::Image => &self.encoders.image,
            ParamGroup::ImageRecurrence => &self.encoders.image_recurrence,
            ParamGroup::Text => &self.encoders.text,
            ParamGroup::Action => &self.encoders.action,
            ParamGroup::Fusion => &self.fusion,
        }
    }

    fn submodules_mut(&mut self) -> [&mut dyn SubModule; 5] {
        let Encoders { image, image_recurrence, text, action } = &mut self.encoders;
        [image as &mut dyn SubModule, image_recurrence, text, action, &mut self.fusion]
    }

    /// Every trainable tensor, grouped in order image, image recurrence,
    /// text, action, fusion. The views borrow the model's own buffers, which
    /// are never reallocated after construction.
    pub fn get_parameters(&self) -> Vec<ParameterRef<'_>> {
        ParamGroup::ALL
            .iter()
            .flat_map(|&group| {
                self.submodule(group)
                    .tensors()
                    .into_iter()
                    .map(move |(name, data)| ParameterRef { group, name, data })
            })
            .collect()
    }

    /// Mutable counterpart of `get_parameters`, same order.
    pub fn get_parameters_mut(&mut self) -> Vec<ParameterMut<'_>> {
        let mut out = Vec::new();
        for (group, module) in ParamGroup::ALL.into_iter().zip(self.submodules_mut()) {
            for (name, data) in module.tensors_mut() {
                out.push(ParameterMut { group, name, data });
            }
        }
        out
    }

    pub fn num_params(&self) -> usize {
        ParamGroup::ALL.iter().map(|&g| self.submodule(g).num_params()).sum()
    }

    pub fn params_per_group(&self) -> Vec<(ParamGroup, usize)> {
        ParamGroup::ALL.iter().map(|&g| (g, self.submodule(g).num_params())).collect()
    }

    /// All parameters concatenated in `get_parameters` order.
    pub fn flatten_parameters(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.num_params());
        for p in self.get_parameters() {
            flat.extend_from_slice(p.data);
        }
        flat
    }

    /// SGD step over the flat parameter vector: param -= lr * grad.
    pub fn apply_gradients(&mut self, grads: &[f32], lr: f32) -> Result<(), PolicyError> {
        let expected = self.num_params();
        if grads.len() != expected {
            return Err(PolicyError::GradientLength { expected, found: grads.len() });
        }
        let mut offset = 0;
        for p in self.get_parameters_mut() {
            let n = p.data.len();
            for (v, g) in p.data.iter_mut().zip(&grads[offset..offset + n]) {
                *v -= lr * g;
            }
            offset += n;
        }
        Ok(())
    }

    pub fn group_state(&self, group: ParamGroup) -> GroupState {
        self.submodule(group).state()
    }

    /// Replace one group's parameters. The other groups are untouched.
    pub fn load_group_state(&mut self, state: GroupState) -> Result<(), PersistenceError> {
        let index = state.group().index();
        let [image, image_recurrence, text, action, fusion] = self.submodules_mut();
        let module: &mut dyn SubModule = match index {
            0 => image,
            1 => image_recurrence,
            2 => text,
            3 => action,
            _ => fusion,
        };
        module.load_state(state)
    }
}
