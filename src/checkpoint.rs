//! Parameter persistence
//!
//! Trained parameters are written once, as a single safetensors file, after a
//! run completes. Failed runs write nothing.

use candle_nn::VarMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TrainError};

pub fn save_parameters(varmap: &VarMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| TrainError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    varmap.save(path)?;
    info!(path = %path.display(), tensors = varmap.all_vars().len(), "saved parameters");
    Ok(())
}

/// Overwrite the variables of `varmap` with the tensors stored at `path`.
pub fn load_parameters(varmap: &mut VarMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TrainError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "weights file not found"),
        });
    }
    varmap.load(path)?;
    info!(path = %path.display(), "loaded parameters");
    Ok(())
}
