//! Frame-folder video dataset and batch loader
//!
//! Videos are stored as pre-extracted frame images listed in a JSON manifest:
//!
//! ```json
//! { "videos": [ { "id": "clip_0", "frames": ["clip_0/0000.png", "clip_0/0001.png"], "speeds": [0.1, 0.2] } ] }
//! ```
//!
//! Frame paths are relative to the data root. `speeds` is optional; when present
//! it holds one value per frame.

use candle_core::{Device, Tensor};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::collate::{Batch, VideoSample, padded_collate};
use crate::config::{DataConfig, TrainingConfig};
use crate::error::{Result, TrainError};
use crate::trainer::BatchSource;
use crate::utils::Pcg32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub videos: Vec<VideoEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoEntry {
    pub id: String,
    pub frames: Vec<PathBuf>,
    #[serde(default)]
    pub speeds: Vec<f32>,
}

impl Manifest {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TrainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| TrainError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Load an image as a `(3, height, width)` F32 tensor normalized to `[-1, 1]`.
pub fn load_frame(path: &Path, height: usize, width: usize) -> Result<Tensor> {
    let img = image::open(path)
        .map_err(|e| TrainError::Dataset(format!("failed to decode {}: {e}", path.display())))?;
    let img = img
        .resize_exact(width as u32, height as u32, image::imageops::FilterType::Triangle)
        .to_rgb8();

    // HWC interleaved -> CHW planes
    let plane = height * width;
    let mut data = vec![0f32; 3 * plane];
    for (idx, pixel) in img.pixels().enumerate() {
        for (c, &v) in pixel.0.iter().enumerate() {
            data[c * plane + idx] = (v as f32 / 255.0) * 2.0 - 1.0;
        }
    }
    Ok(Tensor::from_vec(data, (3, height, width), &Device::Cpu)?)
}

/// Clips of `n_sample_frames` frames, `sample_rate` apart, from each video.
#[derive(Debug, Clone)]
pub struct FrameDataset {
    root: PathBuf,
    videos: Vec<VideoEntry>,
    height: usize,
    width: usize,
    n_sample_frames: usize,
    sample_rate: usize,
}

impl FrameDataset {
    pub fn new(root: impl Into<PathBuf>, manifest: Manifest, data: &DataConfig) -> Result<Self> {
        for video in &manifest.videos {
            if video.frames.is_empty() {
                return Err(TrainError::Dataset(format!("video {} has no frames", video.id)));
            }
            if !video.speeds.is_empty() && video.speeds.len() != video.frames.len() {
                return Err(TrainError::Dataset(format!(
                    "video {} has {} speeds for {} frames",
                    video.id,
                    video.speeds.len(),
                    video.frames.len()
                )));
            }
        }
        Ok(Self {
            root: root.into(),
            videos: manifest.videos,
            height: data.train_height,
            width: data.train_width,
            n_sample_frames: data.n_sample_frames,
            sample_rate: data.sample_rate,
        })
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    /// Frame indices of the clip starting at `start`, truncated at the end of the video.
    pub fn clip_indices(&self, video: usize, start: usize) -> Vec<usize> {
        let len = self.videos[video].frames.len();
        (0..self.n_sample_frames)
            .map(|k| start + k * self.sample_rate)
            .take_while(|&idx| idx < len)
            .collect()
    }

    /// Random clip start such that the full clip fits when the video is long enough.
    pub fn pick_start(&self, video: usize, rng: &mut Pcg32) -> usize {
        let len = self.videos[video].frames.len();
        let span = (self.n_sample_frames - 1) * self.sample_rate + 1;
        if len <= span {
            0
        } else {
            rng.next_below((len - span + 1) as u32) as usize
        }
    }

    pub fn load_clip(&self, video: usize, start: usize) -> Result<VideoSample> {
        let entry = &self.videos[video];
        let indices = self.clip_indices(video, start);
        let images = indices
            .iter()
            .map(|&i| load_frame(&self.root.join(&entry.frames[i]), self.height, self.width))
            .collect::<Result<Vec<_>>>()?;
        let speeds = if entry.speeds.is_empty() {
            Vec::new()
        } else {
            indices.iter().map(|&i| entry.speeds[i]).collect()
        };
        Ok(VideoSample::new(images).with_speeds(speeds))
    }
}

/// Shuffled, collated batches over a [`FrameDataset`].
///
/// Clip decoding for one batch runs on a rayon pool of `num_workers` threads.
pub struct BatchLoader {
    dataset: FrameDataset,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: Pcg32,
    pool: Option<rayon::ThreadPool>,
}

impl BatchLoader {
    pub fn new(dataset: FrameDataset, training: &TrainingConfig, rng: Pcg32) -> Result<Self> {
        let pool = if training.num_workers > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(training.num_workers)
                    .build()
                    .map_err(|e| TrainError::Dataset(format!("failed to start decode workers: {e}")))?,
            )
        } else {
            None
        };
        info!(
            videos = dataset.len(),
            batch_size = training.batch_size,
            workers = training.num_workers,
            "batch loader ready"
        );
        Ok(Self {
            dataset,
            batch_size: training.batch_size,
            order: Vec::new(),
            cursor: 0,
            rng,
            pool,
        })
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn load_batch(&self, clips: &[(usize, usize)]) -> Result<Batch> {
        let load = || {
            clips
                .par_iter()
                .map(|&(video, start)| self.dataset.load_clip(video, start))
                .collect::<Result<Vec<_>>>()
        };
        let samples = match &self.pool {
            Some(pool) => pool.install(load)?,
            None => clips
                .iter()
                .map(|&(video, start)| self.dataset.load_clip(video, start))
                .collect::<Result<Vec<_>>>()?,
        };
        padded_collate(&samples)
    }
}

impl BatchSource for BatchLoader {
    fn begin_epoch(&mut self, epoch: usize) {
        self.order = (0..self.dataset.len()).collect();
        self.rng.shuffle(&mut self.order);
        self.cursor = 0;
        debug!(epoch, batches = self.num_batches(), "shuffled dataset");
    }

    fn next_batch(&mut self) -> Option<Result<Batch>> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let clips: Vec<(usize, usize)> = self.order[self.cursor..end]
            .iter()
            .map(|&video| (video, self.dataset.pick_start(video, &mut self.rng)))
            .collect();
        self.cursor = end;
        Some(self.load_batch(&clips))
    }
}
