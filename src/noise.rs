//! Diffusion noise augmentation of latents.

use candle_core::Tensor;

use crate::config::NoiseSchedulerConfig;
use crate::error::Result;
use crate::scheduler::DdpmNoiseScheduler;
use crate::utils::Pcg32;

/// Output of [`NoiseAugmentor::augment`].
#[derive(Debug, Clone)]
pub struct NoisyLatents {
    pub noisy: Tensor,
    pub noise: Tensor,
    /// One timestep per example, reused downstream as-is
    pub timesteps: Vec<usize>,
    /// `timesteps` as an `(N,)` F32 tensor on the latents' device
    pub timestep_tensor: Tensor,
}

/// Samples per-example timesteps and applies the schedule's forward noising.
#[derive(Debug, Clone)]
pub struct NoiseAugmentor {
    scheduler: DdpmNoiseScheduler,
}

impl NoiseAugmentor {
    pub fn new(config: NoiseSchedulerConfig) -> Self {
        Self {
            scheduler: DdpmNoiseScheduler::new(config),
        }
    }

    pub fn scheduler(&self) -> &DdpmNoiseScheduler {
        &self.scheduler
    }

    /// `n` independent timesteps, uniform over `[0, num_train_timesteps)`.
    pub fn sample_timesteps(&self, n: usize, rng: &mut Pcg32) -> Vec<usize> {
        let bound = self.scheduler.num_train_timesteps() as u32;
        (0..n).map(|_| rng.next_below(bound) as usize).collect()
    }

    pub fn augment(&self, latents: &Tensor, rng: &mut Pcg32) -> Result<NoisyLatents> {
        let n = latents.dim(0)?;
        let timesteps = self.sample_timesteps(n, rng);
        let noise = rng
            .randn(latents.shape(), latents.device())?
            .to_dtype(latents.dtype())?;
        let noisy = self.scheduler.add_noise(latents, &noise, &timesteps)?;
        let timestep_tensor = DdpmNoiseScheduler::timestep_tensor(&timesteps, latents.device())?;
        Ok(NoisyLatents {
            noisy,
            noise,
            timesteps,
            timestep_tensor,
        })
    }
}
