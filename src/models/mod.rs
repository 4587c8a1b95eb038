//! Baseline networks implementing the trainer's model contracts.
//!
//! They are small enough to train on CPU and exist so that the training
//! binary and the end-to-end tests drive a real optimisation.

pub mod blocks;
pub mod frames_vae;
pub mod reference_net;

pub use frames_vae::{FramesEncodingVae, FramesVaeConfig};
pub use reference_net::{ReferenceNetConfig, TinyAutoencoder, TinyReferenceNet};
