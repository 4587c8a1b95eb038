//! Baseline frames-encoding VAE
//!
//! A small convolutional stand-in for the reconstruction network trained with
//! the causal window. The reference frame is reconstructed directly; every
//! motion frame is reconstructed conditioned on the reference features and
//! the speed embedding, so the output width tracks the window width.

use candle_core::{Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder, conv2d, linear};

use super::blocks::SpeedEncoder;
use crate::config::TrainConfig;
use crate::model::FramesVae;

#[derive(Debug, Clone)]
pub struct FramesVaeConfig {
    pub in_channels: usize,
    pub hidden_channels: usize,
    pub num_speed_buckets: usize,
    pub speed_embedding_dim: usize,
}

impl FramesVaeConfig {
    pub fn from_train_config(config: &TrainConfig) -> Self {
        Self {
            in_channels: 3,
            hidden_channels: config.base_model.unet().block_out_channels.first().copied().unwrap_or(64),
            num_speed_buckets: config.num_speed_buckets,
            speed_embedding_dim: config.speed_embedding_dim,
        }
    }
}

#[derive(Debug)]
pub struct FramesEncodingVae {
    reference_in: Conv2d,
    motion_in: Conv2d,
    speed_encoder: SpeedEncoder,
    speed_proj: Linear,
    conv_out: Conv2d,
    in_channels: usize,
    hidden_channels: usize,
}

impl FramesEncodingVae {
    pub fn new(vb: VarBuilder, config: &FramesVaeConfig) -> Result<Self> {
        let same = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let c = config.in_channels;
        let hidden = config.hidden_channels;
        Ok(Self {
            reference_in: conv2d(c, hidden, 3, same, vb.pp("reference_in"))?,
            motion_in: conv2d(c, hidden, 3, same, vb.pp("motion_in"))?,
            speed_encoder: SpeedEncoder::new(
                vb.pp("speed_encoder"),
                config.num_speed_buckets,
                config.speed_embedding_dim,
            )?,
            speed_proj: linear(config.speed_embedding_dim, hidden, vb.pp("speed_proj"))?,
            conv_out: conv2d(hidden, c, 3, same, vb.pp("conv_out"))?,
            in_channels: c,
            hidden_channels: hidden,
        })
    }
}

impl FramesVae for FramesEncodingVae {
    fn forward(&self, reference: &Tensor, motion_frames: &Tensor, speed: Option<&Tensor>) -> Result<Tensor> {
        let mut cond = candle_nn::ops::silu(&self.reference_in.forward(reference)?)?;
        if let Some(speed) = speed {
            let n = speed.dim(0)?;
            let emb = self.speed_proj.forward(&self.speed_encoder.forward(speed)?)?;
            let emb = emb.reshape((n, self.hidden_channels, 1, 1))?;
            cond = cond.broadcast_add(&emb)?;
        }

        let (_, motion_channels, _, _) = motion_frames.dims4()?;
        if motion_channels % self.in_channels != 0 {
            candle_core::bail!(
                "motion frames have {motion_channels} channels, not a multiple of {}",
                self.in_channels
            );
        }

        let mut outputs = Vec::with_capacity(1 + motion_channels / self.in_channels);
        outputs.push(self.conv_out.forward(&cond)?);
        for k in 0..motion_channels / self.in_channels {
            let frame = motion_frames.narrow(1, k * self.in_channels, self.in_channels)?;
            let h = (self.motion_in.forward(&frame)? + &cond)?;
            outputs.push(self.conv_out.forward(&candle_nn::ops::silu(&h)?)?);
        }
        Tensor::cat(&outputs, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_output_tracks_window_width() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = FramesEncodingVae::new(
            vb,
            &FramesVaeConfig {
                in_channels: 3,
                hidden_channels: 8,
                num_speed_buckets: 3,
                speed_embedding_dim: 4,
            },
        )?;
        let reference = Tensor::zeros((1, 3, 8, 8), DType::F32, &Device::Cpu)?;
        let speed = Tensor::new(&[[0.5f32]], &Device::Cpu)?;
        for w in 1..4 {
            let motion = Tensor::zeros((1, 3 * w, 8, 8), DType::F32, &Device::Cpu)?;
            let out = model.forward(&reference, &motion, Some(&speed))?;
            assert_eq!(out.dims(), &[1, 3 * (1 + w), 8, 8]);
        }
        let bad = Tensor::zeros((1, 4, 8, 8), DType::F32, &Device::Cpu)?;
        assert!(model.forward(&reference, &bad, None).is_err());
        Ok(())
    }
}
