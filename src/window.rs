//! Temporal context windows.
//!
//! Two policies live here:
//!
//! - [`nearby_frames_features`] always yields `D * (m + n + 1)` values and
//!   zero-pads positions that fall outside the sequence, so windows can be
//!   stacked into a fixed-shape tensor.
//! - [`causal_window`] and [`motion_history`] slice raw frames for the
//!   trainer. They never pad: the causal window shrinks near the start of a
//!   batch and the motion history is simply unavailable until enough frames
//!   have been seen.

use candle_core::Tensor;
use std::ops::Range;

use crate::error::{Result, TrainError};

/// Concatenate the features of frames `f - m ..= f + n` into one vector.
///
/// `features` is `(L, D)`. Out-of-range neighbours become zero vectors of
/// length `D`. Returns a rank-1 tensor of length `D * (m + n + 1)`.
pub fn nearby_frames_features(features: &Tensor, f: usize, m: usize, n: usize) -> Result<Tensor> {
    let (len, _dim) = features
        .dims2()
        .map_err(|_| TrainError::shape(format!("feature sequence must be (L, D), got {:?}", features.dims())))?;
    if f >= len {
        return Err(TrainError::Index { index: f, len });
    }

    let start = f.saturating_sub(m);
    let end = (f + n + 1).min(len);
    let pad_before = m.saturating_sub(f);
    let pad_after = (f + n + 1).saturating_sub(len);

    let window = features
        .narrow(0, start, end - start)?
        .pad_with_zeros(0, pad_before, pad_after)?;
    Ok(window.flatten_all()?)
}

/// Windows for every frame of a sequence, stacked to `(L, D * (m + n + 1))`.
pub fn stack_nearby_frames(features: &Tensor, m: usize, n: usize) -> Result<Tensor> {
    let (len, _dim) = features
        .dims2()
        .map_err(|_| TrainError::shape(format!("feature sequence must be (L, D), got {:?}", features.dims())))?;
    if len == 0 {
        return Err(TrainError::shape("feature sequence is empty"));
    }
    let padded = features.pad_with_zeros(0, m, n)?;
    let width = m + n + 1;
    let windows = (0..len)
        .map(|f| padded.narrow(0, f, width)?.flatten_all())
        .collect::<candle_core::Result<Vec<_>>>()?;
    Ok(Tensor::stack(&windows, 0)?)
}

/// Frames `[max(0, i - prev_frames), i]`, current frame included.
pub fn causal_window(i: usize, prev_frames: usize) -> Range<usize> {
    i.saturating_sub(prev_frames)..i + 1
}

/// The `n_motion_frames` frames immediately before `i`, or `None` when there
/// is not enough history (frame 0 never has any).
pub fn motion_history(i: usize, n_motion_frames: usize) -> Option<Range<usize>> {
    if i == 0 || i < n_motion_frames {
        return None;
    }
    Some(i - n_motion_frames..i)
}

/// Concatenate `(1, C_k, H, W)` frames along the channel dimension.
///
/// Frames must agree on every dimension except channels.
pub fn concat_channels(frames: &[Tensor]) -> Result<Tensor> {
    let Some(first) = frames.first() else {
        return Err(TrainError::assertion("cannot concatenate an empty motion window"));
    };
    let (b, _, h, w) = first
        .dims4()
        .map_err(|_| TrainError::assertion(format!("motion frame must be rank 4, got {:?}", first.dims())))?;
    for frame in &frames[1..] {
        match frame.dims4() {
            Ok((fb, _, fh, fw)) if (fb, fh, fw) == (b, h, w) => {}
            _ => {
                return Err(TrainError::assertion(format!(
                    "motion frame {:?} does not match ({b}, _, {h}, {w})",
                    frame.dims()
                )));
            }
        }
    }
    Ok(Tensor::cat(frames, 1)?)
}
