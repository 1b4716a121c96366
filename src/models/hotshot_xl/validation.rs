//! Structural inspection of HotShotXL motion checkpoints
//!
//! Runs over the raw state dict before any module is built and turns the key
//! layout into a typed [`MotionModuleLayout`].

use std::collections::HashMap;

use candle_core::Tensor;
use tracing::debug;

/// Key suffix of the positional encoding buffers, shaped `[1, max_length, channels]`
pub const POSITIONAL_ENCODING_SUFFIX: &str = "pos_encoder.positional_encoding";
/// Marker of down-level keys, followed by the level index
pub const DOWN_BLOCKS_MARKER: &str = "down_blocks";
/// Prefix of middle-level keys
pub const MID_BLOCK_PREFIX: &str = "mid_block.";
/// Marker separating temporal middle-level keys from spatial ones
pub const TEMPORAL_MARKER: &str = "temporal";
/// Highest down-level index of a HotShotXL checkpoint
pub const EXPECTED_MAX_DOWN_BLOCK: usize = 2;

/// A checkpoint that does not have the HotShotXL layout
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MotionCompatibilityError {
    #[error(
        "No pos_encoder.positional_encoding found in mm_state_dict - {mm_name} is not a valid HotShotXL motion module!"
    )]
    MissingPositionalEncoding { mm_name: String },

    #[error(
        "{key} has shape {shape:?}, expected [1, max_length, channels] - {mm_name} is not a valid HotShotXL motion module!"
    )]
    MalformedPositionalEncoding {
        key: String,
        shape: Vec<usize>,
        mm_name: String,
    },

    #[error(
        "Expected biggest down_block to be {expected}, but was {found} - {mm_name} is not a valid HotShotXL motion module!"
    )]
    UnexpectedDownBlockCount {
        expected: usize,
        found: usize,
        mm_name: String,
    },
}

/// Max positional encoding length, read from the middle dim of the first
/// `pos_encoder.positional_encoding` buffer.
pub fn positional_encoding_max_len(
    mm_state_dict: &HashMap<String, Tensor>,
    mm_name: &str,
) -> Result<usize, MotionCompatibilityError> {
    let (key, tensor) = mm_state_dict
        .iter()
        .find(|(key, _)| key.ends_with(POSITIONAL_ENCODING_SUFFIX))
        .ok_or_else(|| MotionCompatibilityError::MissingPositionalEncoding {
            mm_name: mm_name.to_string(),
        })?;

    let dims = tensor.dims();
    if dims.len() < 2 {
        return Err(MotionCompatibilityError::MalformedPositionalEncoding {
            key: key.clone(),
            shape: dims.to_vec(),
            mm_name: mm_name.to_string(),
        });
    }
    Ok(dims[1])
}

/// Ensure the checkpoint has exactly three down levels (indices 0, 1, 2).
///
/// Only the segment right after the first dot is parsed; keys where it is not
/// an integer are skipped.
pub fn validate_down_block_count(
    mm_state_dict: &HashMap<String, Tensor>,
    mm_name: &str,
) -> Result<(), MotionCompatibilityError> {
    let biggest_block = mm_state_dict
        .keys()
        .filter(|key| key.contains(DOWN_BLOCKS_MARKER))
        .filter_map(|key| key.split('.').nth(1)?.parse::<usize>().ok())
        .fold(0, usize::max);

    if biggest_block != EXPECTED_MAX_DOWN_BLOCK {
        return Err(MotionCompatibilityError::UnexpectedDownBlockCount {
            expected: EXPECTED_MAX_DOWN_BLOCK,
            found: biggest_block,
            mm_name: mm_name.to_string(),
        });
    }
    Ok(())
}

/// Whether the checkpoint carries a temporal middle level (HotShotXL v2)
pub fn has_mid_block(mm_state_dict: &HashMap<String, Tensor>) -> bool {
    mm_state_dict
        .keys()
        .any(|key| key.starts_with(MID_BLOCK_PREFIX) && key.contains(TEMPORAL_MARKER))
}

/// Structural parameters derived from a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionModuleLayout {
    pub encoding_max_len: usize,
    pub has_mid_block: bool,
}

impl MotionModuleLayout {
    /// Run the checks in order: positional encoding first, since a missing
    /// buffer means this is not a motion checkpoint at all.
    pub fn inspect(
        mm_state_dict: &HashMap<String, Tensor>,
        mm_name: &str,
    ) -> Result<Self, MotionCompatibilityError> {
        let encoding_max_len = positional_encoding_max_len(mm_state_dict, mm_name)?;
        validate_down_block_count(mm_state_dict, mm_name)?;
        let has_mid_block = has_mid_block(mm_state_dict);

        debug!(
            mm_name,
            encoding_max_len,
            has_mid_block,
            tensors = mm_state_dict.len(),
            "Inspected motion module checkpoint"
        );

        Ok(Self {
            encoding_max_len,
            has_mid_block,
        })
    }
}
