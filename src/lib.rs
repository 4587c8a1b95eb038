//! Candle-Emote: motion-context training for face-animation diffusion models.
//!
//! This crate provides the training-time core: temporal context windows,
//! padded batch collation, latent encoding, diffusion noise augmentation and
//! the per-frame motion-context training loop.

pub mod checkpoint;
pub mod collate;
pub mod config;
pub mod dataset;
pub mod error;
pub mod latent;
pub mod model;
pub mod models;
pub mod noise;
pub mod scheduler;
pub mod trainer;
pub mod utils;
pub mod window;

pub use collate::{Batch, VideoSample, padded_collate};
pub use config::{BaseModel, BetaSchedule, NoiseSchedulerConfig, TrainConfig, WeightDtype};
pub use error::{Result, TrainError};
pub use latent::{
    ImageAutoencoder, LATENT_SCALING_FACTOR, LatentDistribution, LatentEncoder, fold_frames,
    unfold_frames,
};
pub use model::{FramesVae, ReferenceNet};
pub use noise::{NoiseAugmentor, NoisyLatents};
pub use scheduler::DdpmNoiseScheduler;
pub use trainer::{
    BatchSource, EpochStats, FrameOutcome, InMemoryBatches, MotionContextTrainer, TrainReport,
    TrainerState, snr_db,
};
pub use utils::Pcg32;
pub use window::{causal_window, concat_channels, motion_history, nearby_frames_features, stack_nearby_frames};
