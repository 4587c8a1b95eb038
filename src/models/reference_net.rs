//! Baseline reference network and autoencoder
//!
//! Inputs must have height and width divisible by 8.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, VarBuilder, conv2d};

use super::blocks::{Downsample8, TimeConditioning};
use crate::config::TrainConfig;
use crate::latent::{ImageAutoencoder, LatentDistribution};
use crate::model::ReferenceNet;

/// Convolutional encoder producing a diagonal Gaussian over `(N, latent, H / 8, W / 8)`.
#[derive(Debug)]
pub struct TinyAutoencoder {
    down: Downsample8,
    to_moments: Conv2d,
}

impl TinyAutoencoder {
    pub fn new(vb: VarBuilder, in_channels: usize, hidden_channels: usize, latent_channels: usize) -> Result<Self> {
        let down = Downsample8::new(vb.pp("encoder"), in_channels, hidden_channels, hidden_channels)?;
        let to_moments = conv2d(
            hidden_channels,
            2 * latent_channels,
            1,
            Default::default(),
            vb.pp("quant_conv"),
        )?;
        Ok(Self { down, to_moments })
    }
}

impl ImageAutoencoder for TinyAutoencoder {
    fn encode(&self, images: &Tensor) -> Result<LatentDistribution> {
        let (_, _, h, w) = images.dims4()?;
        if h % 8 != 0 || w % 8 != 0 {
            candle_core::bail!("image size {h}x{w} is not a multiple of 8");
        }
        let h = candle_nn::ops::silu(&self.down.forward(images)?)?;
        let moments = self.to_moments.forward(&h)?;
        LatentDistribution::from_moments(&moments)
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceNetConfig {
    pub in_channels: usize,
    pub latent_channels: usize,
    pub hidden_channels: usize,
    pub motion_channels: usize,
    pub time_embed_dim: usize,
}

impl ReferenceNetConfig {
    pub fn from_train_config(config: &TrainConfig) -> Self {
        let unet = config.base_model.unet();
        Self {
            in_channels: 3,
            latent_channels: config.base_model.latent_channels(),
            hidden_channels: unet.block_out_channels.first().copied().unwrap_or(64),
            motion_channels: unet.cross_attention_dim,
            time_embed_dim: 32,
        }
    }
}

#[derive(Debug)]
pub struct TinyReferenceNet {
    autoencoder: TinyAutoencoder,
    reference_down: Downsample8,
    motion_down: Downsample8,
    time_conditioning: TimeConditioning,
    conv_in: Conv2d,
    conv_out: Conv2d,
    hidden_channels: usize,
}

impl TinyReferenceNet {
    /// `vb` holds trainable weights, `vae_vb` the frozen autoencoder.
    pub fn new(vb: VarBuilder, vae_vb: VarBuilder, config: &ReferenceNetConfig) -> Result<Self> {
        let same = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let hidden = config.hidden_channels;
        Ok(Self {
            autoencoder: TinyAutoencoder::new(vae_vb, config.in_channels, hidden, config.latent_channels)?,
            reference_down: Downsample8::new(vb.pp("reference_down"), config.in_channels, hidden, hidden)?,
            motion_down: Downsample8::new(
                vb.pp("motion_down"),
                config.in_channels,
                hidden,
                config.motion_channels,
            )?,
            time_conditioning: TimeConditioning::new(vb.pp("time_conditioning"), config.time_embed_dim, hidden)?,
            conv_in: conv2d(
                hidden + config.motion_channels + config.latent_channels,
                hidden,
                3,
                same,
                vb.pp("conv_in"),
            )?,
            conv_out: conv2d(hidden, config.latent_channels, 3, same, vb.pp("conv_out"))?,
            hidden_channels: hidden,
        })
    }
}

impl ReferenceNet for TinyReferenceNet {
    fn autoencoder(&self) -> &dyn ImageAutoencoder {
        &self.autoencoder
    }

    fn pre_extract_motion_features(&self, motion_frames: &Tensor) -> Result<Tensor> {
        // Pool the history into one feature map
        self.motion_down.forward(motion_frames)?.mean_keepdim(0)
    }

    fn forward(
        &self,
        reference_image: &Tensor,
        motion_features: &Tensor,
        noisy_latent: &Tensor,
        timesteps: &Tensor,
    ) -> Result<Tensor> {
        let reference = self.reference_down.forward(reference_image)?;
        let x = Tensor::cat(&[&reference, motion_features, noisy_latent], 1)?;
        let h = self.conv_in.forward(&x)?;

        let n = timesteps.dim(0)?;
        let t_emb = self
            .time_conditioning
            .forward(timesteps, h.dtype())?
            .reshape((n, self.hidden_channels, 1, 1))?;
        let h = candle_nn::ops::silu(&h.broadcast_add(&t_emb)?)?;
        self.conv_out.forward(&h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn config() -> ReferenceNetConfig {
        ReferenceNetConfig {
            in_channels: 3,
            latent_channels: 4,
            hidden_channels: 8,
            motion_channels: 6,
            time_embed_dim: 8,
        }
    }

    #[test]
    fn test_reference_net_shapes() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vae_map = VarMap::new();
        let net = TinyReferenceNet::new(
            VarBuilder::from_varmap(&varmap, DType::F32, &dev),
            VarBuilder::from_varmap(&vae_map, DType::F32, &dev),
            &config(),
        )?;
        let motion = Tensor::zeros((3, 3, 16, 16), DType::F32, &dev)?;
        let features = net.pre_extract_motion_features(&motion)?;
        assert_eq!(features.dims(), &[1, 6, 2, 2]);

        let reference = Tensor::zeros((1, 3, 16, 16), DType::F32, &dev)?;
        let noisy = Tensor::zeros((1, 4, 2, 2), DType::F32, &dev)?;
        let t = Tensor::new(&[10f32], &dev)?;
        let out = net.forward(&reference, &features, &noisy, &t)?;
        assert_eq!(out.dims(), &[1, 4, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_autoencoder_rejects_unaligned_size() -> Result<()> {
        let dev = Device::Cpu;
        let vae_map = VarMap::new();
        let vae = TinyAutoencoder::new(VarBuilder::from_varmap(&vae_map, DType::F32, &dev), 3, 8, 4)?;
        let img = Tensor::zeros((1, 3, 12, 16), DType::F32, &dev)?;
        assert!(vae.encode(&img).is_err());
        Ok(())
    }
}
