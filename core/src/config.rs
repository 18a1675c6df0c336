/// Model configuration and embedding constants.
///
/// Two JSON mappings feed the model: the environment config (action space,
/// image size, vocabulary, instruction encoder choice) and the constants
/// (embedding dimensions). Both are immutable after construction.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Environment-facing configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub num_actions: usize,
    pub image_height: usize,
    pub image_width: usize,
    pub use_pointer_model: bool,
    pub vocab_size: usize,
    /// Seed for deterministic parameter initialisation.
    #[serde(default)]
    pub seed: u64,
}

/// Embedding dimensions and fusion-head sizing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyConstants {
    pub image_emb_dim: usize,
    pub lstm_emb_dim: usize,
    pub word_emb_dim: usize,
    pub action_emb_dim: usize,
    #[serde(default = "default_image_conv_channels")]
    pub image_conv_channels: usize,
    #[serde(default = "default_fusion_hidden_dim")]
    pub fusion_hidden_dim: usize,
    #[serde(default)]
    pub fusion_dropout: f32,
}

fn default_image_conv_channels() -> usize {
    8
}

fn default_fusion_hidden_dim() -> usize {
    64
}

const CONFIG_KEYS: [&str; 5] = [
    "num_actions",
    "image_height",
    "image_width",
    "use_pointer_model",
    "vocab_size",
];

const CONSTANTS_KEYS: [&str; 4] = [
    "image_emb_dim",
    "lstm_emb_dim",
    "word_emb_dim",
    "action_emb_dim",
];

fn require_keys(value: &Value, keys: &[&'static str]) -> Result<(), ConfigError> {
    let map = value.as_object().ok_or(ConfigError::NotAnObject)?;
    for &key in keys {
        if !map.contains_key(key) {
            return Err(ConfigError::MissingKey { key });
        }
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

fn positive(key: &'static str, v: usize) -> Result<(), ConfigError> {
    if v == 0 {
        return Err(ConfigError::InvalidValue { key, reason: "must be >= 1".into() });
    }
    Ok(())
}

impl PolicyConfig {
    /// Tiny configuration for tests: 8x8 images, 5 actions, 20-word vocabulary.
    pub fn test_config() -> Self {
        PolicyConfig {
            num_actions: 5,
            image_height: 8,
            image_width: 8,
            use_pointer_model: false,
            vocab_size: 20,
            seed: 42,
        }
    }

    /// Same as `test_config` with the pointer instruction encoder.
    pub fn test_config_pointer() -> Self {
        PolicyConfig { use_pointer_model: true, ..Self::test_config() }
    }

    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        require_keys(value, &CONFIG_KEYS)?;
        let cfg: PolicyConfig = serde_json::from_value(value.clone())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Self::from_value(&serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_value(&read_json(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("num_actions", self.num_actions)?;
        positive("image_height", self.image_height)?;
        positive("image_width", self.image_width)?;
        positive("vocab_size", self.vocab_size)?;
        Ok(())
    }

    /// Reserved previous-action index meaning "no action taken yet".
    pub fn none_action(&self) -> usize {
        self.num_actions
    }
}

impl PolicyConstants {
    pub fn test_constants() -> Self {
        PolicyConstants {
            image_emb_dim: 12,
            lstm_emb_dim: 6,
            word_emb_dim: 5,
            action_emb_dim: 4,
            image_conv_channels: 4,
            fusion_hidden_dim: 16,
            fusion_dropout: 0.0,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        require_keys(value, &CONSTANTS_KEYS)?;
        let constants: PolicyConstants = serde_json::from_value(value.clone())?;
        constants.validate()?;
        Ok(constants)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Self::from_value(&serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_value(&read_json(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("image_emb_dim", self.image_emb_dim)?;
        positive("lstm_emb_dim", self.lstm_emb_dim)?;
        positive("word_emb_dim", self.word_emb_dim)?;
        positive("action_emb_dim", self.action_emb_dim)?;
        positive("image_conv_channels", self.image_conv_channels)?;
        positive("fusion_hidden_dim", self.fusion_hidden_dim)?;
        if !(0.0..1.0).contains(&self.fusion_dropout) {
            return Err(ConfigError::InvalidValue {
                key: "fusion_dropout",
                reason: format!("must be in [0, 1), got {}", self.fusion_dropout),
            });
        }
        Ok(())
    }

    /// Width of the instruction embedding for the chosen encoder.
    /// The pointer encoder concatenates four LSTM states.
    pub fn text_emb_dim(&self, use_pointer_model: bool) -> usize {
        if use_pointer_model {
            4 * self.lstm_emb_dim
        } else {
            self.lstm_emb_dim
        }
    }

    /// Width of the fused image + instruction + action embedding.
    pub fn total_emb_dim(&self, use_pointer_model: bool) -> usize {
        self.image_emb_dim + self.text_emb_dim(use_pointer_model) + self.action_emb_dim
    }
}

/// Validate config and constants as a pair before building a model.
pub fn validate_setup(config: &PolicyConfig, constants: &PolicyConstants) -> Result<(), ConfigError> {
    config.validate()?;
    constants.validate()?;
    Ok(())
}

/// Emit every config and constants entry at info level.
pub fn log_details(config: &PolicyConfig, constants: &PolicyConstants) {
    for (title, value) in [
        ("CONFIG DETAILS", serde_json::to_value(config)),
        ("CONSTANTS DETAILS", serde_json::to_value(constants)),
    ] {
        tracing::info!("{title}");
        if let Ok(Value::Object(map)) = value {
            for (k, v) in map {
                tracing::info!("    {k} --- {v}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_key_is_named() {
        let value = json!({
            "num_actions": 4, "image_height": 8, "image_width": 8, "vocab_size": 10
        });
        match PolicyConfig::from_value(&value) {
            Err(ConfigError::MissingKey { key }) => assert_eq!(key, "use_pointer_model"),
            other => panic!("expected MissingKey, got {other:?}"),
        }
    }

    #[test]
    fn test_constants_defaults_apply() {
        let value = json!({
            "image_emb_dim": 32, "lstm_emb_dim": 16, "word_emb_dim": 8, "action_emb_dim": 4
        });
        let constants = PolicyConstants::from_value(&value).unwrap();
        assert_eq!(constants.image_conv_channels, 8);
        assert_eq!(constants.fusion_hidden_dim, 64);
        assert_eq!(constants.fusion_dropout, 0.0);
    }

    #[test]
    fn test_pointer_quadruples_text_width() {
        let c = PolicyConstants::test_constants();
        assert_eq!(c.text_emb_dim(true), 4 * c.text_emb_dim(false));
        assert_eq!(c.total_emb_dim(true), c.image_emb_dim + 4 * c.lstm_emb_dim + c.action_emb_dim);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut cfg = PolicyConfig::test_config();
        cfg.num_actions = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidValue { key: "num_actions", .. })));
    }

    #[test]
    fn test_dropout_range() {
        let mut c = PolicyConstants::test_constants();
        c.fusion_dropout = 1.0;
        assert!(c.validate().is_err());
        c.fusion_dropout = 0.5;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_not_an_object() {
        assert!(matches!(PolicyConfig::from_json_str("[1, 2]"), Err(ConfigError::NotAnObject)));
    }
}
