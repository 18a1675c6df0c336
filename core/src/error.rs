//! Error taxonomy for the policy core.
//!
//! Precondition violations and persistence failures are surfaced as typed
//! errors. Device degradation is not an error (see `device`).

use std::path::PathBuf;

use thiserror::Error;

use crate::submodule::ParamGroup;

/// Configuration and constants errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key: {key}")]
    MissingKey { key: &'static str },

    #[error("configuration must be a JSON object")]
    NotAnObject,

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while saving or loading a parameter group.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{group} group: I/O error on {path}: {source}")]
    Io {
        group: ParamGroup,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{group} group: malformed state in {path}: {source}")]
    Malformed {
        group: ParamGroup,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{group} group: file {path} holds state for the {found} group")]
    WrongGroup {
        group: ParamGroup,
        found: ParamGroup,
        path: PathBuf,
    },

    #[error("{group} group: {reason}")]
    StateMismatch { group: ParamGroup, reason: String },
}

impl PersistenceError {
    /// The parameter group the failure belongs to.
    pub fn group(&self) -> ParamGroup {
        match self {
            PersistenceError::Io { group, .. }
            | PersistenceError::Malformed { group, .. }
            | PersistenceError::WrongGroup { group, .. }
            | PersistenceError::StateMismatch { group, .. } => *group,
        }
    }
}

/// Errors returned by the policy model's public operations.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid observation record: {reason}")]
    InvalidObservation { reason: String },

    #[error("action index {action} out of range (num_actions={num_actions}, no-op={num_actions})")]
    ActionOutOfRange { action: usize, num_actions: usize },

    #[error("token index {token} out of range (vocab_size={vocab_size})")]
    TokenOutOfRange { token: usize, vocab_size: usize },

    #[error("read pointer [{start}, {end}) invalid for instruction of length {len}")]
    ReadPointerOutOfRange { start: usize, end: usize, len: usize },

    #[error("image shape {found:?} does not match expected {expected:?}")]
    ImageShapeMismatch { expected: [usize; 3], found: Vec<usize> },

    #[error("batch must contain at least one observation record")]
    EmptyBatch,

    #[error("recurrent carry has dimension {found}, model expects {expected}")]
    CarryMismatch { expected: usize, found: usize },

    #[error("flat gradient length {found} does not match parameter count {expected}")]
    GradientLength { expected: usize, found: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
