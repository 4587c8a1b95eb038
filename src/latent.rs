//! Pixel-to-latent encoding
//!
//! Wraps an external autoencoder: fold frames into the batch dimension,
//! encode, draw one posterior sample, scale.

use candle_core::{DType, Tensor};

use crate::error::{Result, TrainError};
use crate::utils::Pcg32;

/// Latent scaling constant of the Stable Diffusion autoencoder.
pub const LATENT_SCALING_FACTOR: f64 = 0.18215;

/// An external image autoencoder.
///
/// Input: `(N, C, H, W)` images. Output: the posterior over `(N, latent_channels, H', W')`.
pub trait ImageAutoencoder {
    fn encode(&self, images: &Tensor) -> candle_core::Result<LatentDistribution>;
}

/// Diagonal Gaussian posterior returned by [`ImageAutoencoder::encode`].
#[derive(Debug, Clone)]
pub struct LatentDistribution {
    mean: Tensor,
    std: Tensor,
}

impl LatentDistribution {
    /// Split encoder moments `(N, 2 * C, H, W)` into mean and log-variance.
    pub fn from_moments(moments: &Tensor) -> candle_core::Result<Self> {
        let channels = moments.dim(1)?;
        if channels == 0 || channels % 2 != 0 {
            candle_core::bail!("moments must have an even channel count, got {:?}", moments.dims());
        }
        let mean = moments.narrow(1, 0, channels / 2)?;
        let logvar = moments.narrow(1, channels / 2, channels / 2)?;
        Self::from_mean_logvar(&mean, &logvar)
    }

    pub fn from_mean_logvar(mean: &Tensor, logvar: &Tensor) -> candle_core::Result<Self> {
        let logvar = logvar.clamp(-30f32, 20f32)?;
        let std = (logvar * 0.5)?.exp()?;
        Ok(Self {
            mean: mean.clone(),
            std,
        })
    }

    pub fn mean(&self) -> &Tensor {
        &self.mean
    }

    /// One reparameterised draw: `mean + std * eps`.
    pub fn sample(&self, rng: &mut Pcg32) -> candle_core::Result<Tensor> {
        let eps = rng
            .randn(self.mean.shape(), self.mean.device())?
            .to_dtype(self.mean.dtype())?;
        self.mean.add(&self.std.mul(&eps)?)
    }
}

/// Merge batch and frame dimensions.
///
/// `(B, F, C, H, W)` becomes `(B * F, C, H, W)`; rank-4 input is returned as is.
pub fn fold_frames(x: &Tensor) -> Result<Tensor> {
    match x.rank() {
        4 => Ok(x.clone()),
        5 => {
            let (b, f, c, h, w) = x.dims5()?;
            Ok(x.reshape((b * f, c, h, w))?)
        }
        r => Err(TrainError::shape(format!(
            "expected a rank 4 or 5 image batch, got rank {r} {:?}",
            x.dims()
        ))),
    }
}

/// Inverse of [`fold_frames`]: `(B * F, C, H, W)` to `(B, F, C, H, W)`.
pub fn unfold_frames(x: &Tensor, batch: usize) -> Result<Tensor> {
    let (n, c, h, w) = x
        .dims4()
        .map_err(|_| TrainError::shape(format!("expected rank 4, got {:?}", x.dims())))?;
    if batch == 0 || n % batch != 0 {
        return Err(TrainError::shape(format!(
            "cannot split {n} frames into {batch} batches"
        )));
    }
    Ok(x.reshape((batch, n / batch, c, h, w))?)
}

/// Maps image batches to scaled rank-4 latents.
#[derive(Debug, Clone)]
pub struct LatentEncoder {
    scaling_factor: f64,
    dtype: DType,
}

impl LatentEncoder {
    pub fn new(dtype: DType) -> Self {
        Self {
            scaling_factor: LATENT_SCALING_FACTOR,
            dtype,
        }
    }

    pub fn with_scaling_factor(mut self, scaling_factor: f64) -> Self {
        self.scaling_factor = scaling_factor;
        self
    }

    pub fn scaling_factor(&self) -> f64 {
        self.scaling_factor
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Encode `(N, C, H, W)` or `(B, F, C, H, W)` images.
    ///
    /// Output is always `(N, latent_channels, H', W')` in `self.dtype`. Each call
    /// draws a fresh posterior sample from `rng`.
    pub fn encode<A>(&self, autoencoder: &A, images: &Tensor, rng: &mut Pcg32) -> Result<Tensor>
    where
        A: ImageAutoencoder + ?Sized,
    {
        let images = fold_frames(images)?.to_dtype(self.dtype)?;
        let posterior = autoencoder.encode(&images).map_err(TrainError::Encoding)?;
        let latents = (posterior.sample(rng)? * self.scaling_factor)?;
        let latents = fold_frames(&latents)?;
        Ok(latents.to_dtype(self.dtype)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_fold_rank5() {
        let x = Tensor::zeros((2, 3, 4, 8, 8), DType::F32, &Device::Cpu).unwrap();
        let folded = fold_frames(&x).unwrap();
        assert_eq!(folded.dims(), &[6, 4, 8, 8]);
        let unfolded = unfold_frames(&folded, 2).unwrap();
        assert_eq!(unfolded.dims(), &[2, 3, 4, 8, 8]);
    }

    #[test]
    fn test_fold_rejects_rank3() {
        let x = Tensor::zeros((3, 8, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(fold_frames(&x), Err(TrainError::Shape(_))));
    }

    #[test]
    fn test_unfold_rejects_uneven_split() {
        let x = Tensor::zeros((5, 4, 2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(unfold_frames(&x, 2).is_err());
    }

    #[test]
    fn test_moments_split() {
        let dev = Device::Cpu;
        let mean = Tensor::ones((1, 4, 2, 2), DType::F32, &dev).unwrap();
        let logvar = Tensor::zeros((1, 4, 2, 2), DType::F32, &dev).unwrap();
        let moments = Tensor::cat(&[&mean, &logvar], 1).unwrap();
        let dist = LatentDistribution::from_moments(&moments).unwrap();
        assert_eq!(dist.mean().dims(), &[1, 4, 2, 2]);
        let mut rng = Pcg32::seeded(0);
        let s = dist.sample(&mut rng).unwrap();
        assert_eq!(s.dims(), &[1, 4, 2, 2]);
    }

    #[test]
    fn test_moments_reject_odd_channels() {
        let dev = Device::Cpu;
        let moments = Tensor::zeros((1, 5, 2, 2), DType::F32, &dev).unwrap();
        assert!(LatentDistribution::from_moments(&moments).is_err());
        let moments = Tensor::zeros((1, 1, 2, 2), DType::F32, &dev).unwrap();
        assert!(LatentDistribution::from_moments(&moments).is_err());
    }
}
