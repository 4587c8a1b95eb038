//! Error types for the training core.

use std::path::PathBuf;

/// Errors surfaced by collation, windowing, encoding and the training loop.
///
/// Every error terminates the current run; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("shape error: {0}")]
    Shape(String),

    #[error("frame index {index} out of range for sequence of length {len}")]
    Index { index: usize, len: usize },

    #[error("latent encoding failed: {0}")]
    Encoding(#[source] candle_core::Error),

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("failed at epoch {epoch}, batch {batch}, frame {frame}")]
    Frame {
        epoch: usize,
        batch: usize,
        frame: usize,
        #[source]
        source: Box<TrainError>,
    },

    #[error("failed to load batch {batch} of epoch {epoch}")]
    Batch {
        epoch: usize,
        batch: usize,
        #[source]
        source: Box<TrainError>,
    },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl TrainError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub(crate) fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    /// Attach the position of the failing frame.
    pub fn at_frame(self, epoch: usize, batch: usize, frame: usize) -> Self {
        Self::Frame {
            epoch,
            batch,
            frame,
            source: Box::new(self),
        }
    }

    /// Attach the position of a batch that could not be loaded.
    pub fn at_batch(self, epoch: usize, batch: usize) -> Self {
        Self::Batch {
            epoch,
            batch,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrainError>;
