//! Configuration for HotShotXL motion modules
//!
//! The structural constants match the published HotShotXL checkpoints. They are
//! kept in a serializable config so tests and alternative host models can build
//! narrower trees with the same layout.

use serde::{Deserialize, Serialize};

/// Attention heads per temporal transformer.
pub const NUM_ATTENTION_HEADS: usize = 8;
/// Group count of the channel normalization in front of each temporal transformer.
pub const NORM_NUM_GROUPS: usize = 32;
/// Number of frames assumed until the host calls `set_video_length`.
pub const DEFAULT_VIDEO_LENGTH: usize = 8;
/// Base of the sinusoidal positional encoding.
pub const POSITIONAL_ENCODING_SCALE: f64 = 10000.0;
/// Channel widths of the host UNet's three resolution levels (down order).
pub const BLOCK_OUT_CHANNELS: [usize; 3] = [320, 640, 1280];
/// Default checkpoint name when the host does not supply one.
pub const DEFAULT_MM_NAME: &str = "mm_sd_v15.ckpt";

/// HotShotXL motion module configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotShotXLConfig {
    /// Channel widths of the down levels; up levels use the reverse order
    pub block_out_channels: [usize; 3],
    pub num_attention_heads: usize,
    pub norm_num_groups: usize,
    pub group_norm_eps: f64,
    pub layer_norm_eps: f64,
    /// Run the group norm in float32 regardless of activation dtype
    pub upcast_group_norm: bool,
    /// TransformerBlocks per TransformerTemporal
    pub num_layers: usize,
    /// (TemporalAttention, LayerNorm) pairs per TransformerBlock
    pub attention_block_depth: usize,
    pub ff_mult: usize,
    /// GEGLU feed-forward when true, plain GELU projection otherwise
    pub geglu: bool,
    /// Context width for cross-attention; `None` builds self-attention only
    pub cross_attention_dim: Option<usize>,
    pub default_video_length: usize,
}

impl Default for HotShotXLConfig {
    fn default() -> Self {
        Self {
            block_out_channels: BLOCK_OUT_CHANNELS,
            num_attention_heads: NUM_ATTENTION_HEADS,
            norm_num_groups: NORM_NUM_GROUPS,
            group_norm_eps: 1e-6,
            layer_norm_eps: 1e-5,
            upcast_group_norm: false,
            num_layers: 1,
            attention_block_depth: 2,
            ff_mult: 4,
            geglu: true,
            cross_attention_dim: None,
            default_video_length: DEFAULT_VIDEO_LENGTH,
        }
    }
}

impl HotShotXLConfig {
    /// Channel widths of the up levels, widest first
    pub fn up_block_channels(&self) -> [usize; 3] {
        let [a, b, c] = self.block_out_channels;
        [c, b, a]
    }

    /// Channel width of the middle level
    pub fn mid_block_channels(&self) -> usize {
        self.block_out_channels[2]
    }

    /// Per-head dimension for a level of the given width
    pub fn attention_head_dim(&self, in_channels: usize) -> usize {
        in_channels / self.num_attention_heads
    }

    /// Check that every level can be split into heads and norm groups
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_attention_heads == 0 {
            return Err(ConfigError::ZeroField("num_attention_heads"));
        }
        if self.norm_num_groups == 0 {
            return Err(ConfigError::ZeroField("norm_num_groups"));
        }
        if self.num_layers == 0 {
            return Err(ConfigError::ZeroField("num_layers"));
        }
        if self.attention_block_depth == 0 {
            return Err(ConfigError::ZeroField("attention_block_depth"));
        }
        if self.default_video_length == 0 {
            return Err(ConfigError::ZeroField("default_video_length"));
        }
        for &channels in &self.block_out_channels {
            if channels % self.num_attention_heads != 0 {
                return Err(ConfigError::IndivisibleHeads {
                    channels,
                    heads: self.num_attention_heads,
                });
            }
            if channels % self.norm_num_groups != 0 {
                return Err(ConfigError::IndivisibleGroups {
                    channels,
                    groups: self.norm_num_groups,
                });
            }
        }
        Ok(())
    }

    /// Set the level channel widths
    pub fn with_block_out_channels(mut self, channels: [usize; 3]) -> Self {
        self.block_out_channels = channels;
        self
    }

    /// Set the cross-attention context width
    pub fn with_cross_attention_dim(mut self, dim: Option<usize>) -> Self {
        self.cross_attention_dim = dim;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    ZeroField(&'static str),
    #[error("Channel width {channels} is not divisible by {heads} attention heads")]
    IndivisibleHeads { channels: usize, heads: usize },
    #[error("Channel width {channels} is not divisible by {groups} norm groups")]
    IndivisibleGroups { channels: usize, groups: usize },
}
