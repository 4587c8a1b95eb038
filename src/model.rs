//! Contracts of the networks driven by the trainer.
//!
//! The trainer never looks inside these models; it only relies on the tensor
//! shapes documented here.

use candle_core::{Result, Tensor};

use crate::latent::ImageAutoencoder;

/// Reconstruction model trained with the channel-concatenated causal window.
pub trait FramesVae {
    /// - `reference`: `(1, C, H, W)`
    /// - `motion_frames`: `(1, C * w, H, W)`, the `w` causal frames ending at the reference
    /// - `speed`: `(1, 1)` when the dataset provides speeds
    ///
    /// Returns `(1, C * (1 + w), H, W)`, matched against `[reference] + window`.
    fn forward(&self, reference: &Tensor, motion_frames: &Tensor, speed: Option<&Tensor>) -> Result<Tensor>;
}

/// Diffusion-conditioned reference network.
pub trait ReferenceNet {
    /// The frozen autoencoder whose latents the network reconstructs.
    fn autoencoder(&self) -> &dyn ImageAutoencoder;

    /// `(n_motion_frames, C, H, W)` history frames to motion features consumed by
    /// [`ReferenceNet::forward`].
    fn pre_extract_motion_features(&self, motion_frames: &Tensor) -> Result<Tensor>;

    /// - `reference_image`: `(1, C, H, W)`
    /// - `motion_features`: output of [`ReferenceNet::pre_extract_motion_features`]
    /// - `noisy_latent`: `(1, latent_channels, H', W')`
    /// - `timesteps`: `(1,)`
    ///
    /// Returns the reconstructed clean latent, same shape as `noisy_latent`.
    fn forward(
        &self,
        reference_image: &Tensor,
        motion_features: &Tensor,
        noisy_latent: &Tensor,
        timesteps: &Tensor,
    ) -> Result<Tensor>;
}
