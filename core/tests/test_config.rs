//! Loading config and constants from JSON files and building a model from them.

use std::io::Write;

use incremental_policy_core::config::{log_details, validate_setup};
use incremental_policy_core::{
    ConfigError, ExecutionContext, IncrementalPolicyModel, PolicyConfig, PolicyConstants, PolicyError,
};

fn write_json(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(body.as_bytes()).unwrap();
    path
}

#[test]
fn test_model_from_json_files() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_json(
        &dir,
        "config.json",
        r#"{"num_actions": 4, "image_height": 10, "image_width": 12,
            "use_pointer_model": true, "vocab_size": 30, "seed": 3}"#,
    );
    let constants_path = write_json(
        &dir,
        "constants.json",
        r#"{"image_emb_dim": 8, "lstm_emb_dim": 5, "word_emb_dim": 6, "action_emb_dim": 3,
            "image_conv_channels": 2, "fusion_hidden_dim": 12}"#,
    );

    let config = PolicyConfig::from_json_file(&config_path).unwrap();
    let constants = PolicyConstants::from_json_file(&constants_path).unwrap();
    validate_setup(&config, &constants).unwrap();
    log_details(&config, &constants);

    let model = IncrementalPolicyModel::with_context(config, constants, ExecutionContext::cpu()).unwrap();
    assert!(model.text_module().is_pointer());
    assert_eq!(model.image_module().frame_shape(), [3, 10, 12]);
    assert_eq!(model.config().none_action(), 4);
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    match PolicyConfig::from_json_file(&path) {
        Err(ConfigError::Io { path: p, .. }) => assert_eq!(p, path),
        other => panic!("expected Io error, got {other:?}"),
    }
}

#[test]
fn test_missing_constant_is_named() {
    let err = PolicyConstants::from_json_str(r#"{"image_emb_dim": 8, "lstm_emb_dim": 5, "word_emb_dim": 6}"#)
        .unwrap_err();
    assert!(matches!(err, ConfigError::MissingKey { key: "action_emb_dim" }));
    assert!(err.to_string().contains("action_emb_dim"));
}

#[test]
fn test_invalid_setup_refused_by_model() {
    let mut constants = PolicyConstants::test_constants();
    constants.lstm_emb_dim = 0;
    let err = IncrementalPolicyModel::new(PolicyConfig::test_config(), constants).err().unwrap();
    assert!(matches!(err, PolicyError::Config(ConfigError::InvalidValue { key: "lstm_emb_dim", .. })));
}

#[test]
fn test_seed_defaults_to_zero() {
    let config = PolicyConfig::from_json_str(
        r#"{"num_actions": 2, "image_height": 4, "image_width": 4, "use_pointer_model": false, "vocab_size": 5}"#,
    )
    .unwrap();
    assert_eq!(config.seed, 0);
}
