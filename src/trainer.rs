//! Motion-context training loop
//!
//! Drives one of two per-frame training variants over a stream of batches:
//!
//! - [`MotionContextTrainer::train_frames_vae`]: the model reconstructs the
//!   reference frame together with its channel-concatenated causal window.
//! - [`MotionContextTrainer::train_reference_net`]: the model reconstructs
//!   the clean reference latent from the reference image, pre-extracted
//!   motion features and a noise-augmented latent.
//!
//! The optimizer steps once per processed frame, not once per batch.
//! Gradients are recomputed from scratch for every frame.

use candle_core::{DType, Device, Tensor};
use candle_nn::Optimizer;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::collate::Batch;
use crate::config::TrainConfig;
use crate::error::{Result, TrainError};
use crate::latent::LatentEncoder;
use crate::model::{FramesVae, ReferenceNet};
use crate::noise::NoiseAugmentor;
use crate::utils::Pcg32;
use crate::window::{causal_window, concat_channels, motion_history};

/// Where the trainer currently is in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Epoch(usize),
    Batch { epoch: usize, batch: usize },
    Frame { epoch: usize, batch: usize, frame: usize },
    ParameterUpdate { epoch: usize, batch: usize, frame: usize },
    Done,
}

/// Result of processing one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameOutcome {
    /// Not enough history; no forward pass and no parameter update
    Skipped,
    Trained { loss: f32, snr_db: Option<f64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    /// Summed frame losses divided by the number of batches
    pub loss: f64,
    /// Mean reconstruction SNR over trained frames, when measured
    pub snr_db: Option<f64>,
    pub batches: usize,
    pub steps: usize,
    pub skipped_frames: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    pub epochs: Vec<EpochStats>,
}

impl TrainReport {
    pub fn total_steps(&self) -> usize {
        self.epochs.iter().map(|e| e.steps).sum()
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.loss)
    }
}

/// A re-iterable stream of batches.
pub trait BatchSource {
    /// Called before the first batch of every epoch.
    fn begin_epoch(&mut self, epoch: usize);

    fn next_batch(&mut self) -> Option<Result<Batch>>;
}

/// Batches already held in memory, replayed in order every epoch.
#[derive(Debug, Clone)]
pub struct InMemoryBatches {
    batches: Vec<Batch>,
    pending: VecDeque<usize>,
}

impl InMemoryBatches {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches,
            pending: VecDeque::new(),
        }
    }
}

impl BatchSource for InMemoryBatches {
    fn begin_epoch(&mut self, _epoch: usize) {
        self.pending = (0..self.batches.len()).collect();
    }

    fn next_batch(&mut self) -> Option<Result<Batch>> {
        self.pending.pop_front().map(|i| Ok(self.batches[i].clone()))
    }
}

/// Reconstruction SNR in decibels: `10 * log10(mean(x^2) / mean((x - y)^2))`.
pub fn snr_db(signal: &Tensor, reconstruction: &Tensor) -> Result<f64> {
    let signal = signal.detach().to_dtype(DType::F32)?;
    let reconstruction = reconstruction.detach().to_dtype(DType::F32)?;
    let signal_power = signal.sqr()?.mean_all()?.to_scalar::<f32>()? as f64;
    let noise_power = (&signal - &reconstruction)?
        .sqr()?
        .mean_all()?
        .to_scalar::<f32>()? as f64;
    Ok(10.0 * (signal_power / noise_power).log10())
}

pub struct MotionContextTrainer<O: Optimizer> {
    optimizer: O,
    device: Device,
    dtype: DType,
    rng: Pcg32,
    latent_encoder: LatentEncoder,
    noise: NoiseAugmentor,
    prev_frames: usize,
    n_motion_frames: usize,
    num_epochs: usize,
    move_batches_to_device: bool,
    state: TrainerState,
    steps: usize,
}

impl<O: Optimizer> MotionContextTrainer<O> {
    pub fn new(config: &TrainConfig, optimizer: O, device: Device) -> Self {
        let dtype = config.weight_dtype.dtype();
        Self {
            optimizer,
            device,
            dtype,
            rng: Pcg32::from_optional_seed(config.seed),
            latent_encoder: LatentEncoder::new(dtype),
            noise: NoiseAugmentor::new(config.noise_scheduler_kwargs.clone()),
            prev_frames: config.training.prev_frames,
            n_motion_frames: config.data.n_motion_frames,
            num_epochs: config.training.num_epochs,
            move_batches_to_device: config.training.use_gpu_video_tensor,
            state: TrainerState::Idle,
            steps: 0,
        }
    }

    pub fn with_rng(mut self, rng: Pcg32) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    /// Optimizer steps taken so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn into_optimizer(self) -> O {
        self.optimizer
    }

    fn to_input(&self, t: Tensor) -> Result<Tensor> {
        Ok(t.to_device(&self.device)?.to_dtype(self.dtype)?)
    }

    fn update(&mut self, loss: &Tensor) -> Result<f32> {
        if let TrainerState::Frame { epoch, batch, frame } = self.state {
            self.state = TrainerState::ParameterUpdate { epoch, batch, frame };
        }
        self.optimizer.backward_step(loss)?;
        self.steps += 1;
        Ok(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?)
    }

    /// One explicit-window step on frame `i` of `batch`.
    ///
    /// The window `[max(0, i - prev_frames), i]` is never padded, so it holds a
    /// single frame at `i = 0`.
    pub fn frames_vae_step<M>(&mut self, model: &M, batch: &Batch, i: usize) -> Result<FrameOutcome>
    where
        M: FramesVae + ?Sized,
    {
        let reference = self.to_input(batch.frame(i)?)?;
        let window = causal_window(i, self.prev_frames)
            .map(|j| batch.frame(j).and_then(|f| self.to_input(f)))
            .collect::<Result<Vec<_>>>()?;
        let motion_frames = concat_channels(&window)?;

        let mut target_frames = Vec::with_capacity(window.len() + 1);
        target_frames.push(reference.clone());
        target_frames.extend(window.iter().cloned());
        let target = concat_channels(&target_frames)?;

        let speed = match batch.speed(i)? {
            Some(speed) => Some(self.to_input(speed)?),
            None => None,
        };

        let reconstruction = model.forward(&reference, &motion_frames, speed.as_ref())?;
        if reconstruction.dims() != target.dims() {
            return Err(TrainError::assertion(format!(
                "reconstruction {:?} does not match target {:?}",
                reconstruction.dims(),
                target.dims()
            )));
        }
        let loss = candle_nn::loss::mse(&reconstruction, &target)?;
        let loss = self.update(&loss)?;
        debug!(frame = i, window = window.len(), loss, "frames-vae step");
        Ok(FrameOutcome::Trained { loss, snr_db: None })
    }

    /// One diffusion-conditioned step on frame `i` of `batch`.
    ///
    /// Frames with fewer than `n_motion_frames` predecessors are skipped.
    pub fn reference_net_step<M>(&mut self, model: &M, batch: &Batch, i: usize) -> Result<FrameOutcome>
    where
        M: ReferenceNet + ?Sized,
    {
        let Some(history) = motion_history(i, self.n_motion_frames) else {
            return Ok(FrameOutcome::Skipped);
        };

        let reference_image = self.to_input(batch.frame(i)?)?;
        let motion_frames = self.to_input(batch.frames(history)?)?;
        if reference_image.rank() != 4 || reference_image.dim(0)? != 1 {
            return Err(TrainError::assertion(format!(
                "reference image should be (1, C, H, W), got {:?}",
                reference_image.dims()
            )));
        }
        if motion_frames.rank() != 4 || motion_frames.dim(0)? != self.n_motion_frames {
            return Err(TrainError::assertion(format!(
                "motion frames should be ({}, C, H, W), got {:?}",
                self.n_motion_frames,
                motion_frames.dims()
            )));
        }

        let motion_features = model.pre_extract_motion_features(&motion_frames)?;
        let reference_latent =
            self.latent_encoder
                .encode(model.autoencoder(), &reference_image, &mut self.rng)?;
        let noisy = self.noise.augment(&reference_latent, &mut self.rng)?;

        let reconstruction = model.forward(
            &reference_image,
            &motion_features,
            &noisy.noisy,
            &noisy.timestep_tensor.to_device(&self.device)?,
        )?;
        if reconstruction.dims() != reference_latent.dims() {
            return Err(TrainError::assertion(format!(
                "reconstruction {:?} does not match reference latent {:?}",
                reconstruction.dims(),
                reference_latent.dims()
            )));
        }

        let loss = candle_nn::loss::mse(&reconstruction, &reference_latent)?;
        let loss = self.update(&loss)?;
        let snr = snr_db(&reference_latent, &reconstruction)?;
        let timestep = noisy.timesteps[0];
        debug!(
            frame = i,
            timestep,
            schedule_snr = self.noise.scheduler().snr(timestep)?,
            loss,
            snr_db = snr,
            "reference-net step"
        );
        Ok(FrameOutcome::Trained {
            loss,
            snr_db: Some(snr),
        })
    }

    /// Run all epochs of explicit-window VAE training.
    pub fn train_frames_vae<M, S>(&mut self, model: &M, source: &mut S) -> Result<TrainReport>
    where
        M: FramesVae + ?Sized,
        S: BatchSource + ?Sized,
    {
        self.run(source, |trainer, batch, i| trainer.frames_vae_step(model, batch, i))
    }

    /// Run all epochs of diffusion-conditioned reference-net training.
    pub fn train_reference_net<M, S>(&mut self, model: &M, source: &mut S) -> Result<TrainReport>
    where
        M: ReferenceNet + ?Sized,
        S: BatchSource + ?Sized,
    {
        self.run(source, |trainer, batch, i| trainer.reference_net_step(model, batch, i))
    }

    fn run<S, F>(&mut self, source: &mut S, mut step: F) -> Result<TrainReport>
    where
        S: BatchSource + ?Sized,
        F: FnMut(&mut Self, &Batch, usize) -> Result<FrameOutcome>,
    {
        let mut report = TrainReport::default();

        for epoch in 0..self.num_epochs {
            self.state = TrainerState::Epoch(epoch);
            source.begin_epoch(epoch);

            let mut running_loss = 0.0f64;
            let mut snrs = Vec::new();
            let mut batches = 0usize;
            let mut steps = 0usize;
            let mut skipped_frames = 0usize;

            while let Some(batch) = source.next_batch() {
                let batch_idx = batches;
                let batch = batch
                    .and_then(|b| {
                        if self.move_batches_to_device {
                            b.to_device(&self.device)
                        } else {
                            Ok(b)
                        }
                    })
                    .map_err(|e| e.at_batch(epoch, batch_idx))?;
                self.state = TrainerState::Batch {
                    epoch,
                    batch: batch_idx,
                };

                for i in 0..batch.len() {
                    self.state = TrainerState::Frame {
                        epoch,
                        batch: batch_idx,
                        frame: i,
                    };
                    match step(self, &batch, i).map_err(|e| e.at_frame(epoch, batch_idx, i))? {
                        FrameOutcome::Skipped => skipped_frames += 1,
                        FrameOutcome::Trained { loss, snr_db } => {
                            running_loss += loss as f64;
                            steps += 1;
                            snrs.extend(snr_db);
                        }
                    }
                }
                batches += 1;
            }

            if batches == 0 {
                warn!(epoch, "epoch produced no batches");
            }
            let loss = running_loss / batches.max(1) as f64;
            let snr_db = (!snrs.is_empty()).then(|| snrs.iter().sum::<f64>() / snrs.len() as f64);
            match snr_db {
                Some(snr) => info!(
                    "Epoch [{}/{}], Loss: {:.4}, SNR: {:.2} dB",
                    epoch + 1,
                    self.num_epochs,
                    loss,
                    snr
                ),
                None => info!("Epoch [{}/{}], Loss: {:.4}", epoch + 1, self.num_epochs, loss),
            }
            report.epochs.push(EpochStats {
                epoch,
                loss,
                snr_db,
                batches,
                steps,
                skipped_frames,
            });
        }

        self.state = TrainerState::Done;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snr_of_half_error() -> Result<()> {
        let dev = Device::Cpu;
        let x = Tensor::new(&[2f32, 2., 2., 2.], &dev)?;
        let y = Tensor::new(&[1f32, 1., 1., 1.], &dev)?;
        // signal power 4, error power 1 -> 10 * log10(4)
        let snr = snr_db(&x, &y)?;
        assert!((snr - 10.0 * 4f64.log10()).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_in_memory_batches_replay_each_epoch() {
        use crate::collate::{VideoSample, padded_collate};
        let dev = Device::Cpu;
        let img = Tensor::zeros((3, 2, 2), DType::F32, &dev).unwrap();
        let batch = padded_collate(&[VideoSample::new(vec![img])]).unwrap();
        let mut source = InMemoryBatches::new(vec![batch.clone(), batch]);
        for epoch in 0..2 {
            source.begin_epoch(epoch);
            let mut count = 0;
            while let Some(b) = source.next_batch() {
                assert!(b.is_ok());
                count += 1;
            }
            assert_eq!(count, 2);
        }
    }
}
