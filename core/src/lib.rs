pub mod tensor;
pub mod lstm;
pub mod config;
pub mod error;
pub mod device;
pub mod observation;
pub mod submodule;
pub mod image_module;
pub mod image_recurrence;
pub mod text_module;
pub mod action_module;
pub mod fusion;
pub mod model;
pub mod persistence;
pub mod param_server;
pub mod rollout;
pub mod dataset;

pub use config::{PolicyConfig, PolicyConstants};
pub use device::{Device, DevicePreference, ExecutionContext};
pub use error::{ConfigError, PersistenceError, PolicyError};
pub use fusion::{ActionDistribution, InferenceMode, RecurrentCarry, StepOutput};
pub use model::IncrementalPolicyModel;
pub use observation::{ObservationRecord, ReadPointer};
pub use submodule::{GroupState, ParamGroup, SubModule};
