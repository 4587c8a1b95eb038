//! Configuration structures for motion-context training

use candle_core::DType;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TrainError};

/// Top-level training configuration, loaded once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub training: TrainingConfig,
    pub data: DataConfig,
    /// Number of discrete speed buckets for the speed embedding
    #[serde(default = "default_num_speed_buckets")]
    pub num_speed_buckets: usize,
    /// Width of each speed embedding vector
    #[serde(default = "default_speed_embedding_dim")]
    pub speed_embedding_dim: usize,
    #[serde(default)]
    pub weight_dtype: WeightDtype,
    #[serde(default)]
    pub noise_scheduler_kwargs: NoiseSchedulerConfig,
    /// Backbone family the reference network is derived from
    #[serde(default)]
    pub base_model: BaseModel,
    /// Seed for noise, timestep and shuffling draws. Unseeded runs are not reproducible.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Loop-level knobs (`training.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    /// Decode workers for the batch loader (0 decodes on the calling thread)
    #[serde(default)]
    pub num_workers: usize,
    /// History length for the channel-concatenated causal window
    #[serde(default = "default_prev_frames")]
    pub prev_frames: usize,
    /// Move collated batches to the accelerator before the frame loop
    #[serde(default)]
    pub use_gpu_video_tensor: bool,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
}

/// Dataset shape knobs (`data.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub train_height: usize,
    pub train_width: usize,
    /// Frames drawn per video per iteration
    pub n_sample_frames: usize,
    /// Stride between drawn frames
    #[serde(default = "default_sample_rate")]
    pub sample_rate: usize,
    /// Frames of history required before a frame is trained on
    #[serde(default = "default_n_motion_frames")]
    pub n_motion_frames: usize,
}

fn default_num_speed_buckets() -> usize {
    9
}

fn default_speed_embedding_dim() -> usize {
    64
}

fn default_prev_frames() -> usize {
    2
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_num_epochs() -> usize {
    10
}

fn default_sample_rate() -> usize {
    1
}

fn default_n_motion_frames() -> usize {
    2
}

/// Precision of weights and latents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightDtype {
    Fp16,
    Bf16,
    #[default]
    Fp32,
}

impl WeightDtype {
    pub fn dtype(self) -> DType {
        match self {
            Self::Fp16 => DType::F16,
            Self::Bf16 => DType::BF16,
            Self::Fp32 => DType::F32,
        }
    }
}

/// How beta ranges from `beta_start` to `beta_end` over the training timesteps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetaSchedule {
    Linear,
    #[default]
    ScaledLinear,
    SquaredcosCapV2,
}

/// DDPM noise schedule configuration (`noise_scheduler_kwargs.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseSchedulerConfig {
    pub num_train_timesteps: usize,
    pub beta_start: f64,
    pub beta_end: f64,
    #[serde(default)]
    pub beta_schedule: BetaSchedule,
    /// Sampling-time settings of the schedule. Kept so configs round-trip;
    /// forward noising does not read them.
    #[serde(default)]
    pub steps_offset: usize,
    #[serde(default)]
    pub clip_sample: bool,
}

impl Default for NoiseSchedulerConfig {
    fn default() -> Self {
        Self {
            num_train_timesteps: 1000,
            beta_start: 0.00085,
            beta_end: 0.012,
            beta_schedule: BetaSchedule::ScaledLinear,
            steps_offset: 1,
            clip_sample: false,
        }
    }
}

/// UNet dimensions of a Stable Diffusion backbone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnetConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub block_out_channels: Vec<usize>,
    pub cross_attention_dim: usize,
    pub attention_head_dim: Vec<usize>,
}

impl UnetConfig {
    pub fn sd15() -> Self {
        Self {
            in_channels: 4,
            out_channels: 4,
            block_out_channels: vec![320, 640, 1280, 1280],
            cross_attention_dim: 768,
            attention_head_dim: vec![8, 8, 8, 8],
        }
    }

    pub fn sd21() -> Self {
        Self {
            in_channels: 4,
            out_channels: 4,
            block_out_channels: vec![320, 640, 1280, 1280],
            cross_attention_dim: 1024,
            attention_head_dim: vec![5, 10, 20, 20],
        }
    }
}

/// Backbone selection, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "lowercase")]
pub enum BaseModel {
    Sd15(UnetConfig),
    Sd21(UnetConfig),
}

impl Default for BaseModel {
    fn default() -> Self {
        Self::Sd15(UnetConfig::sd15())
    }
}

impl BaseModel {
    pub fn unet(&self) -> &UnetConfig {
        match self {
            Self::Sd15(unet) | Self::Sd21(unet) => unet,
        }
    }

    pub fn latent_channels(&self) -> usize {
        self.unet().in_channels
    }
}

impl TrainConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TrainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| TrainError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(TrainError::Config(msg.to_string()));
        if self.training.batch_size == 0 {
            return invalid("training.batch_size must be at least 1");
        }
        if self.training.learning_rate <= 0.0 {
            return invalid("training.learning_rate must be positive");
        }
        if self.data.train_height == 0 || self.data.train_width == 0 {
            return invalid("data.train_height and data.train_width must be non-zero");
        }
        if self.data.n_sample_frames == 0 {
            return invalid("data.n_sample_frames must be at least 1");
        }
        if self.data.sample_rate == 0 {
            return invalid("data.sample_rate must be at least 1");
        }
        if self.data.n_motion_frames == 0 {
            return invalid("data.n_motion_frames must be at least 1");
        }
        if self.num_speed_buckets == 0 || self.speed_embedding_dim == 0 {
            return invalid("num_speed_buckets and speed_embedding_dim must be non-zero");
        }
        let sched = &self.noise_scheduler_kwargs;
        if sched.num_train_timesteps < 2 {
            return invalid("noise_scheduler_kwargs.num_train_timesteps must be at least 2");
        }
        if !(0.0 < sched.beta_start && sched.beta_start < sched.beta_end && sched.beta_end < 1.0) {
            return invalid("noise_scheduler_kwargs requires 0 < beta_start < beta_end < 1");
        }
        Ok(())
    }
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            training: TrainingConfig {
                batch_size: 1,
                num_workers: 0,
                prev_frames: default_prev_frames(),
                use_gpu_video_tensor: false,
                learning_rate: default_learning_rate(),
                num_epochs: default_num_epochs(),
            },
            data: DataConfig {
                train_height: 256,
                train_width: 256,
                n_sample_frames: 16,
                sample_rate: default_sample_rate(),
                n_motion_frames: default_n_motion_frames(),
            },
            num_speed_buckets: default_num_speed_buckets(),
            speed_embedding_dim: default_speed_embedding_dim(),
            weight_dtype: WeightDtype::default(),
            noise_scheduler_kwargs: NoiseSchedulerConfig::default(),
            base_model: BaseModel::default(),
            seed: None,
        }
    }
}
