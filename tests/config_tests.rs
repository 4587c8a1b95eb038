use std::path::PathBuf;

use candle_core::DType;
use candle_emote::{BaseModel, BetaSchedule, TrainConfig, TrainError};

fn config_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("configs").join(name)
}

#[test]
fn test_shipped_stage1_config_loads() {
    let config = TrainConfig::from_json_file(config_path("stage1.json")).unwrap();
    assert_eq!(config.training.prev_frames, 2);
    assert_eq!(config.data.n_motion_frames, 2);
    assert_eq!(config.weight_dtype.dtype(), DType::F32);
    assert_eq!(config.noise_scheduler_kwargs.beta_schedule, BetaSchedule::ScaledLinear);
    assert!(matches!(config.base_model, BaseModel::Sd15(_)));
    assert_eq!(config.base_model.latent_channels(), 4);
    assert_eq!(config.seed, Some(42));
}

#[test]
fn test_invalid_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ \"training\": ").unwrap();
    match TrainConfig::from_json_file(&path) {
        Err(TrainError::Json { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected a JSON error, got {other:?}"),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let result = TrainConfig::from_json_file(config_path("does_not_exist.json"));
    assert!(matches!(result, Err(TrainError::Io { .. })));
}

#[test]
fn test_sd21_backbone_selection() {
    let json = r#"{
        "training": { "batch_size": 2 },
        "data": { "train_height": 64, "train_width": 64, "n_sample_frames": 4 },
        "base_model": {
            "version": "sd21",
            "in_channels": 4,
            "out_channels": 4,
            "block_out_channels": [320, 640, 1280, 1280],
            "cross_attention_dim": 1024,
            "attention_head_dim": [5, 10, 20, 20]
        }
    }"#;
    let config: TrainConfig = serde_json::from_str(json).unwrap();
    config.validate().unwrap();
    assert_eq!(config.base_model.unet().cross_attention_dim, 1024);
    assert!(matches!(config.base_model, BaseModel::Sd21(_)));
}
