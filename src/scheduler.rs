//! DDPM noise schedule
//!
//! Forward-process noising for training: `x_t = sqrt(a_t) * x_0 + sqrt(1 - a_t) * eps`
//! where `a_t` is the cumulative product of `1 - beta` up to timestep `t`.

use candle_core::{DType, Tensor};

use crate::config::{BetaSchedule, NoiseSchedulerConfig};
use crate::error::{Result, TrainError};

/// DDPM scheduler restricted to what training needs.
#[derive(Debug, Clone)]
pub struct DdpmNoiseScheduler {
    config: NoiseSchedulerConfig,
    betas: Vec<f64>,
    alphas_cumprod: Vec<f64>,
}

impl DdpmNoiseScheduler {
    pub fn new(config: NoiseSchedulerConfig) -> Self {
        let betas = Self::compute_betas(&config);

        let mut alphas_cumprod = Vec::with_capacity(betas.len());
        let mut cumprod = 1.0;
        for beta in &betas {
            cumprod *= 1.0 - beta;
            alphas_cumprod.push(cumprod);
        }

        Self {
            config,
            betas,
            alphas_cumprod,
        }
    }

    fn compute_betas(config: &NoiseSchedulerConfig) -> Vec<f64> {
        let n = config.num_train_timesteps;
        let frac = |i: usize| i as f64 / (n - 1).max(1) as f64;
        match config.beta_schedule {
            BetaSchedule::ScaledLinear => {
                let start = config.beta_start.sqrt();
                let end = config.beta_end.sqrt();
                (0..n)
                    .map(|i| {
                        let beta_sqrt = start + frac(i) * (end - start);
                        beta_sqrt * beta_sqrt
                    })
                    .collect()
            }
            BetaSchedule::Linear => (0..n)
                .map(|i| config.beta_start + frac(i) * (config.beta_end - config.beta_start))
                .collect(),
            BetaSchedule::SquaredcosCapV2 => {
                // Glide cosine schedule, betas capped at 0.999
                let alpha_bar = |t: f64| ((t + 0.008) / 1.008 * std::f64::consts::FRAC_PI_2).cos().powi(2);
                (0..n)
                    .map(|i| {
                        let t1 = i as f64 / n as f64;
                        let t2 = (i + 1) as f64 / n as f64;
                        (1.0 - alpha_bar(t2) / alpha_bar(t1)).min(0.999)
                    })
                    .collect()
            }
        }
    }

    pub fn config(&self) -> &NoiseSchedulerConfig {
        &self.config
    }

    pub fn num_train_timesteps(&self) -> usize {
        self.config.num_train_timesteps
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn alphas_cumprod(&self) -> &[f64] {
        &self.alphas_cumprod
    }

    /// Signal-to-noise ratio `a_t / (1 - a_t)` of timestep `t`.
    pub fn snr(&self, t: usize) -> Result<f64> {
        let a = *self.alphas_cumprod.get(t).ok_or(TrainError::Index {
            index: t,
            len: self.num_train_timesteps(),
        })?;
        Ok(a / (1.0 - a))
    }

    /// Noise `original` (`(N, ...)`) to the per-example `timesteps`.
    pub fn add_noise(&self, original: &Tensor, noise: &Tensor, timesteps: &[usize]) -> Result<Tensor> {
        if original.dims() != noise.dims() {
            return Err(TrainError::shape(format!(
                "noise {:?} does not match latents {:?}",
                noise.dims(),
                original.dims()
            )));
        }
        let n = original.dim(0)?;
        if timesteps.len() != n {
            return Err(TrainError::shape(format!(
                "{} timesteps for {n} latents",
                timesteps.len()
            )));
        }
        if let Some(&t) = timesteps.iter().find(|&&t| t >= self.num_train_timesteps()) {
            return Err(TrainError::Index {
                index: t,
                len: self.num_train_timesteps(),
            });
        }

        let (signal, noise_scale): (Vec<f32>, Vec<f32>) = timesteps
            .iter()
            .map(|&t| {
                let a = self.alphas_cumprod[t];
                (a.sqrt() as f32, (1.0 - a).sqrt() as f32)
            })
            .unzip();

        let mut coeff_shape = vec![1usize; original.rank()];
        coeff_shape[0] = n;
        let device = original.device();
        let dtype = original.dtype();
        let signal = Tensor::from_vec(signal, coeff_shape.as_slice(), device)?.to_dtype(dtype)?;
        let noise_scale = Tensor::from_vec(noise_scale, coeff_shape.as_slice(), device)?.to_dtype(dtype)?;

        let noisy = original
            .broadcast_mul(&signal)?
            .add(&noise.to_dtype(dtype)?.broadcast_mul(&noise_scale)?)?;
        Ok(noisy)
    }

    /// `(N,)` tensor of timesteps for model conditioning.
    pub fn timestep_tensor(timesteps: &[usize], device: &candle_core::Device) -> Result<Tensor> {
        let values: Vec<u32> = timesteps.iter().map(|&t| t as u32).collect();
        Ok(Tensor::from_vec(values, timesteps.len(), device)?.to_dtype(DType::F32)?)
    }
}
