//! Motion checkpoint loading
//!
//! Reads safetensors motion checkpoints into a state dict and JSON configs into
//! [`HotShotXLConfig`](crate::config::HotShotXLConfig) values. Key names are kept
//! as stored; a leading prefix can be stripped for checkpoints exported from a
//! full pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use tracing::{debug, info};

use crate::config::{ConfigError, HotShotXLConfig};

/// Errors that can occur while loading motion checkpoints and configs
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Motion checkpoint not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Cannot read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed motion module config {}", path.display())]
    MalformedConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Motion module config {} is inconsistent: {source}", path.display())]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("{} is not a safetensors checkpoint", path.display())]
    NotSafetensors {
        path: PathBuf,
        #[source]
        source: safetensors::SafeTensorError,
    },

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Load every tensor of a safetensors motion checkpoint onto `device`
pub fn load_motion_state_dict(
    path: impl AsRef<Path>,
    device: &Device,
) -> Result<HashMap<String, Tensor>, LoaderError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(LoaderError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let state_dict = candle_core::safetensors::load(path, device)?;
    info!(
        path = %path.display(),
        tensors = state_dict.len(),
        "Loaded motion checkpoint"
    );
    Ok(state_dict)
}

/// Strip `prefix` from every key that carries it; other keys are kept as is
pub fn strip_key_prefix(
    state_dict: HashMap<String, Tensor>,
    prefix: &str,
) -> HashMap<String, Tensor> {
    let mut stripped = 0usize;
    let state_dict = state_dict
        .into_iter()
        .map(|(key, tensor)| match key.strip_prefix(prefix) {
            Some(rest) => {
                stripped += 1;
                (rest.to_string(), tensor)
            }
            None => (key, tensor),
        })
        .collect();
    debug!(prefix, stripped, "Stripped state dict key prefix");
    state_dict
}

/// Read a [`HotShotXLConfig`] from JSON and check it can build a module tree.
///
/// Missing fields take their defaults, so `{}` yields the published layout.
pub fn load_motion_config(path: impl AsRef<Path>) -> Result<HotShotXLConfig, LoaderError> {
    let path = path.as_ref();
    let raw = std::fs::read(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: HotShotXLConfig =
        serde_json::from_slice(&raw).map_err(|source| LoaderError::MalformedConfig {
            path: path.to_path_buf(),
            source,
        })?;
    config
        .validate()
        .map_err(|source| LoaderError::InvalidConfig {
            path: path.to_path_buf(),
            source,
        })?;

    debug!(path = %path.display(), ?config, "Loaded motion module config");
    Ok(config)
}

/// Sorted tensor names of a safetensors checkpoint, read from its header
pub fn list_tensor_names(path: impl AsRef<Path>) -> Result<Vec<String>, LoaderError> {
    let path = path.as_ref();
    let raw = std::fs::read(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let checkpoint = safetensors::SafeTensors::deserialize(&raw).map_err(|source| {
        LoaderError::NotSafetensors {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let mut names: Vec<String> = checkpoint.names().into_iter().cloned().collect();
    names.sort_unstable();
    Ok(names)
}
