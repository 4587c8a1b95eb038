//! Padded batch collation.
//!
//! Per-video frame lists are flattened into one stream of frames and padded
//! (never resized) to the batch-wide maximum height and width. Content stays
//! anchored at the top-left corner; padding is added on the bottom and right.

use candle_core::{Device, Tensor};
use std::ops::Range;

use crate::error::{Result, TrainError};

/// One dataset record: the frames of a single video clip.
#[derive(Debug, Clone)]
pub struct VideoSample {
    /// `(C, H, W)` frames, all with the same channel count
    pub images: Vec<Tensor>,
    /// One speed value per frame, or empty when the stage has no speeds
    pub speeds: Vec<f32>,
}

impl VideoSample {
    pub fn new(images: Vec<Tensor>) -> Self {
        Self {
            images,
            speeds: Vec::new(),
        }
    }

    pub fn with_speeds(mut self, speeds: Vec<f32>) -> Self {
        self.speeds = speeds;
        self
    }
}

/// A rectangular batch of frames.
///
/// Sample boundaries are not kept: `images` is one flat `(N, C, H, W)` stream.
#[derive(Debug, Clone)]
pub struct Batch {
    images: Tensor,
    speeds: Option<Tensor>,
}

impl Batch {
    /// Build a batch from `(N, C, H, W)` images and optional `(N, 1)` speeds.
    pub fn new(images: Tensor, speeds: Option<Tensor>) -> Result<Self> {
        let (n, _, _, _) = images.dims4().map_err(|_| {
            TrainError::shape(format!(
                "batch images must be (N, C, H, W), got {:?}",
                images.dims()
            ))
        })?;
        if let Some(speeds) = &speeds
            && speeds.dims() != [n, 1]
        {
            return Err(TrainError::shape(format!(
                "speeds must be ({n}, 1), got {:?}",
                speeds.dims()
            )));
        }
        Ok(Self { images, speeds })
    }

    pub fn images(&self) -> &Tensor {
        &self.images
    }

    /// `(N, 1)` when speeds were supplied
    pub fn speeds(&self) -> Option<&Tensor> {
        self.speeds.as_ref()
    }

    pub fn len(&self) -> usize {
        self.images.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame `i` as `(1, C, H, W)`
    pub fn frame(&self, i: usize) -> Result<Tensor> {
        self.check_index(i)?;
        Ok(self.images.narrow(0, i, 1)?)
    }

    /// Frames in `range` as `(range.len(), C, H, W)`
    pub fn frames(&self, range: Range<usize>) -> Result<Tensor> {
        if range.start >= range.end || range.end > self.len() {
            return Err(TrainError::Index {
                index: range.end,
                len: self.len(),
            });
        }
        Ok(self.images.narrow(0, range.start, range.len())?)
    }

    /// Speed of frame `i` as `(1, 1)`
    pub fn speed(&self, i: usize) -> Result<Option<Tensor>> {
        self.check_index(i)?;
        match &self.speeds {
            Some(speeds) => Ok(Some(speeds.narrow(0, i, 1)?)),
            None => Ok(None),
        }
    }

    pub fn to_device(&self, device: &Device) -> Result<Self> {
        let speeds = match &self.speeds {
            Some(speeds) => Some(speeds.to_device(device)?),
            None => None,
        };
        Ok(Self {
            images: self.images.to_device(device)?,
            speeds,
        })
    }

    fn check_index(&self, i: usize) -> Result<()> {
        if i >= self.len() {
            return Err(TrainError::Index {
                index: i,
                len: self.len(),
            });
        }
        Ok(())
    }
}

/// Flatten and zero-pad samples into a [`Batch`].
pub fn padded_collate(samples: &[VideoSample]) -> Result<Batch> {
    let images: Vec<&Tensor> = samples.iter().flat_map(|s| s.images.iter()).collect();
    let speeds: Vec<f32> = samples.iter().flat_map(|s| s.speeds.iter().copied()).collect();

    let Some(first) = images.first() else {
        return Err(TrainError::shape("batch contains no images"));
    };
    let device = first.device().clone();

    let mut dims = Vec::with_capacity(images.len());
    for (idx, img) in images.iter().enumerate() {
        let (c, h, w) = img.dims3().map_err(|_| {
            TrainError::shape(format!(
                "image {idx} must be a 3D (C, H, W) tensor, got {:?}",
                img.dims()
            ))
        })?;
        dims.push((c, h, w));
    }

    let channels = dims[0].0;
    if let Some(idx) = dims.iter().position(|&(c, _, _)| c != channels) {
        return Err(TrainError::shape(format!(
            "image {idx} has {} channels, expected {channels}",
            dims[idx].0
        )));
    }
    let max_height = dims.iter().map(|&(_, h, _)| h).max().unwrap_or(0);
    let max_width = dims.iter().map(|&(_, _, w)| w).max().unwrap_or(0);

    let padded = images
        .iter()
        .zip(&dims)
        .map(|(img, &(_, h, w))| {
            img.pad_with_zeros(1, 0, max_height - h)?
                .pad_with_zeros(2, 0, max_width - w)
        })
        .collect::<candle_core::Result<Vec<_>>>()?;
    let images_tensor = Tensor::stack(&padded, 0)?;

    let speeds_tensor = if speeds.is_empty() {
        None
    } else {
        if speeds.len() != padded.len() {
            return Err(TrainError::shape(format!(
                "{} speeds for {} images",
                speeds.len(),
                padded.len()
            )));
        }
        let n = speeds.len();
        Some(Tensor::from_vec(speeds, (n, 1), &device)?)
    };

    Batch::new(images_tensor, speeds_tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_single_image_passthrough() {
        let img = Tensor::ones((3, 4, 5), DType::F32, &Device::Cpu).unwrap();
        let batch = padded_collate(&[VideoSample::new(vec![img])]).unwrap();
        assert_eq!(batch.images().dims(), &[1, 3, 4, 5]);
        assert!(batch.speeds().is_none());
    }

    #[test]
    fn test_speeds_are_aligned() {
        let dev = Device::Cpu;
        let a = VideoSample::new(vec![
            Tensor::ones((3, 2, 2), DType::F32, &dev).unwrap(),
            Tensor::ones((3, 2, 2), DType::F32, &dev).unwrap(),
        ])
        .with_speeds(vec![0.5, 1.5]);
        let b = VideoSample::new(vec![Tensor::ones((3, 2, 2), DType::F32, &dev).unwrap()])
            .with_speeds(vec![2.5]);
        let batch = padded_collate(&[a, b]).unwrap();
        let speeds = batch.speeds().unwrap();
        assert_eq!(speeds.dims(), &[3, 1]);
        assert_eq!(speeds.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![0.5, 1.5, 2.5]);
        let s = batch.speed(2).unwrap().unwrap();
        assert_eq!(s.dims(), &[1, 1]);
    }

    #[test]
    fn test_speed_count_mismatch() {
        let dev = Device::Cpu;
        let a = VideoSample::new(vec![Tensor::ones((3, 2, 2), DType::F32, &dev).unwrap()])
            .with_speeds(vec![1.0, 2.0]);
        assert!(matches!(padded_collate(&[a]), Err(TrainError::Shape(_))));
    }

    #[test]
    fn test_channel_mismatch() {
        let dev = Device::Cpu;
        let a = VideoSample::new(vec![
            Tensor::ones((3, 2, 2), DType::F32, &dev).unwrap(),
            Tensor::ones((1, 2, 2), DType::F32, &dev).unwrap(),
        ]);
        assert!(matches!(padded_collate(&[a]), Err(TrainError::Shape(_))));
    }

    #[test]
    fn test_empty_batch() {
        assert!(matches!(padded_collate(&[]), Err(TrainError::Shape(_))));
        assert!(matches!(
            padded_collate(&[VideoSample::new(vec![])]),
            Err(TrainError::Shape(_))
        ));
    }

    #[test]
    fn test_frame_index_out_of_range() {
        let img = Tensor::ones((3, 4, 5), DType::F32, &Device::Cpu).unwrap();
        let batch = padded_collate(&[VideoSample::new(vec![img])]).unwrap();
        assert!(batch.frame(0).is_ok());
        assert!(matches!(batch.frame(1), Err(TrainError::Index { .. })));
    }

    #[test]
    fn test_new_rejects_unbatched_images() {
        let dev = Device::Cpu;
        let scalar = Tensor::new(1f32, &dev).unwrap();
        assert!(matches!(Batch::new(scalar, None), Err(TrainError::Shape(_))));
        let single = Tensor::ones((3, 4, 5), DType::F32, &dev).unwrap();
        assert!(matches!(Batch::new(single, None), Err(TrainError::Shape(_))));
    }

    #[test]
    fn test_new_rejects_misaligned_speeds() {
        let dev = Device::Cpu;
        let images = Tensor::ones((2, 3, 4, 4), DType::F32, &dev).unwrap();
        let speeds = Tensor::zeros((3, 1), DType::F32, &dev).unwrap();
        assert!(matches!(
            Batch::new(images.clone(), Some(speeds)),
            Err(TrainError::Shape(_))
        ));
        let speeds = Tensor::zeros((2, 1), DType::F32, &dev).unwrap();
        let batch = Batch::new(images, Some(speeds)).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(!batch.is_empty());
    }
}
