//! Building blocks shared by the baseline networks.

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder, conv2d, linear};

const MAX_PERIOD: f64 = 10_000.0;

/// `[sin(t * f_k), cos(t * f_k)]` features with `f_k = MAX_PERIOD^(-k / (dim / 2))`.
///
/// `(N,)` timesteps to `(N, dim)` in F32. `dim` must be even and non-zero.
pub fn sinusoidal_features(timesteps: &Tensor, dim: usize) -> Result<Tensor> {
    if dim == 0 || dim % 2 != 0 {
        candle_core::bail!("sinusoidal feature width must be even and non-zero, got {dim}");
    }
    let half = dim / 2;
    let freqs: Vec<f32> = (0..half)
        .map(|k| (-MAX_PERIOD.ln() * k as f64 / half as f64).exp() as f32)
        .collect();
    let freqs = Tensor::from_vec(freqs, (1, half), timesteps.device())?;
    let phases = timesteps
        .to_dtype(DType::F32)?
        .unsqueeze(1)?
        .broadcast_mul(&freqs)?;
    Tensor::cat(&[phases.sin()?, phases.cos()?], 1)
}

/// Sinusoidal timestep features followed by a two-layer SiLU MLP.
#[derive(Debug)]
pub struct TimeConditioning {
    fc1: Linear,
    fc2: Linear,
    feature_dim: usize,
}

impl TimeConditioning {
    pub fn new(vb: VarBuilder, feature_dim: usize, out_dim: usize) -> Result<Self> {
        Ok(Self {
            fc1: linear(feature_dim, out_dim, vb.pp("fc1"))?,
            fc2: linear(out_dim, out_dim, vb.pp("fc2"))?,
            feature_dim,
        })
    }

    /// `(N,)` timesteps to `(N, out_dim)` in `dtype`
    pub fn forward(&self, timesteps: &Tensor, dtype: DType) -> Result<Tensor> {
        let features = sinusoidal_features(timesteps, self.feature_dim)?.to_dtype(dtype)?;
        let h = candle_nn::ops::silu(&self.fc1.forward(&features)?)?;
        self.fc2.forward(&h)
    }
}

/// Soft speed buckets: `tanh((speed - center_k) / radius)` projected to an embedding.
#[derive(Debug)]
pub struct SpeedEncoder {
    centers: Tensor,
    radius: f64,
    proj: Linear,
}

impl SpeedEncoder {
    pub fn new(vb: VarBuilder, num_buckets: usize, embedding_dim: usize) -> Result<Self> {
        // Centers spread evenly over [-1, 1]
        let (centers, radius) = if num_buckets == 1 {
            (vec![0f32], 1.0)
        } else {
            let step = 2.0 / (num_buckets - 1) as f32;
            ((0..num_buckets).map(|k| -1.0 + k as f32 * step).collect(), step as f64)
        };
        let centers = Tensor::from_vec(centers, (1, num_buckets), vb.device())?.to_dtype(vb.dtype())?;
        let proj = linear(num_buckets, embedding_dim, vb.pp("proj"))?;
        Ok(Self {
            centers,
            radius,
            proj,
        })
    }

    /// `(N, 1)` speeds to `(N, embedding_dim)`
    pub fn forward(&self, speed: &Tensor) -> Result<Tensor> {
        let speed = speed.to_dtype(self.centers.dtype())?;
        let buckets = (speed.broadcast_sub(&self.centers)? / self.radius)?.tanh()?;
        self.proj.forward(&buckets)
    }
}

/// Three stride-2 convolutions: `(N, C, H, W)` to `(N, out, H / 8, W / 8)`.
#[derive(Debug)]
pub struct Downsample8 {
    convs: Vec<Conv2d>,
}

impl Downsample8 {
    pub fn new(vb: VarBuilder, in_channels: usize, hidden_channels: usize, out_channels: usize) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        let channels = [in_channels, hidden_channels, hidden_channels, out_channels];
        let convs = (0..3)
            .map(|i| conv2d(channels[i], channels[i + 1], 3, cfg, vb.pp(format!("convs.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { convs })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let last = self.convs.len() - 1;
        let mut h = x.clone();
        for (i, conv) in self.convs.iter().enumerate() {
            h = conv.forward(&h)?;
            if i != last {
                h = candle_nn::ops::silu(&h)?;
            }
        }
        Ok(h)
    }
}
