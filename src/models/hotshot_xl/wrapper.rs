//! HotShotXL motion model wrapper
//!
//! Mirrors the tensor layout of a HotShotXL motion checkpoint: `down_blocks`,
//! `up_blocks` and an optional `mid_block`, each holding `temporal_attentions`.
//! The structure is decided by inspecting the checkpoint first and only then
//! building modules from the resulting [`MotionModuleLayout`].

use std::collections::HashMap;
use std::fmt;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::{debug, info};

use super::motion_module::{BlockType, HotShotXLMotionModule};
use super::validation::{MotionCompatibilityError, MotionModuleLayout};
use crate::config::{ConfigError, DEFAULT_MM_NAME, HotShotXLConfig};
use crate::lora::MotionLoraInfo;

/// Errors raised while building a motion model
#[derive(Debug, thiserror::Error)]
pub enum MotionModuleError {
    #[error("Incompatible motion checkpoint: {0}")]
    IncompatibleCheckpoint(#[from] MotionCompatibilityError),

    #[error("Invalid motion module config: {0}")]
    Config(#[from] ConfigError),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// HotShotXL checkpoint generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotShotXLVersion {
    /// Down and up levels only
    V1,
    /// Adds a temporal middle level
    V2,
}

impl HotShotXLVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "HSXL v1",
            Self::V2 => "HSXL v2",
        }
    }
}

impl fmt::Display for HotShotXLVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Injection scheme the host must use for this wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorVersion {
    HotshotXlV1,
}

#[derive(Debug)]
pub struct HotShotXLMotionWrapper {
    down_blocks: Vec<HotShotXLMotionModule>,
    up_blocks: Vec<HotShotXLMotionModule>,
    mid_block: Option<HotShotXLMotionModule>,
    encoding_max_len: usize,
    version: HotShotXLVersion,
    injector_version: InjectorVersion,
    default_video_length: usize,
    video_length: usize,
    mm_hash: String,
    mm_name: String,
    loras: Option<Vec<MotionLoraInfo>>,
}

impl HotShotXLMotionWrapper {
    /// Validate `mm_state_dict` and build the module tree.
    ///
    /// Parameters are taken from `vb` under the checkpoint's own names, so a
    /// `VarBuilder` over the same state dict loads the weights directly.
    /// `mm_name` falls back to [`DEFAULT_MM_NAME`].
    pub fn new(
        mm_state_dict: &HashMap<String, Tensor>,
        vb: VarBuilder,
        mm_hash: impl Into<String>,
        mm_name: Option<&str>,
        loras: Option<Vec<MotionLoraInfo>>,
        config: &HotShotXLConfig,
    ) -> Result<Self, MotionModuleError> {
        let mm_name = mm_name.unwrap_or(DEFAULT_MM_NAME).to_string();
        config.validate()?;
        let layout = MotionModuleLayout::inspect(mm_state_dict, &mm_name)?;
        Self::from_layout(layout, vb, mm_hash.into(), mm_name, loras, config)
    }

    /// Build from a loaded state dict, reading parameters out of it
    pub fn from_state_dict(
        mm_state_dict: HashMap<String, Tensor>,
        dtype: DType,
        device: &Device,
        mm_hash: impl Into<String>,
        mm_name: Option<&str>,
        loras: Option<Vec<MotionLoraInfo>>,
        config: &HotShotXLConfig,
    ) -> Result<Self, MotionModuleError> {
        let mm_name = mm_name.unwrap_or(DEFAULT_MM_NAME).to_string();
        config.validate()?;
        let layout = MotionModuleLayout::inspect(&mm_state_dict, &mm_name)?;
        let vb = VarBuilder::from_tensors(mm_state_dict, dtype, device);
        Self::from_layout(layout, vb, mm_hash.into(), mm_name, loras, config)
    }

    /// Deterministic construction from inspected structural parameters
    pub fn from_layout(
        layout: MotionModuleLayout,
        vb: VarBuilder,
        mm_hash: String,
        mm_name: String,
        loras: Option<Vec<MotionLoraInfo>>,
        config: &HotShotXLConfig,
    ) -> Result<Self, MotionModuleError> {
        let max_len = layout.encoding_max_len;

        let down_blocks = config
            .block_out_channels
            .iter()
            .enumerate()
            .map(|(i, &channels)| {
                HotShotXLMotionModule::new(
                    vb.pp("down_blocks").pp(i),
                    channels,
                    BlockType::Down,
                    max_len,
                    config,
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        let up_blocks = config
            .up_block_channels()
            .iter()
            .enumerate()
            .map(|(i, &channels)| {
                HotShotXLMotionModule::new(
                    vb.pp("up_blocks").pp(i),
                    channels,
                    BlockType::Up,
                    max_len,
                    config,
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        let mid_block = if layout.has_mid_block {
            Some(HotShotXLMotionModule::new(
                vb.pp("mid_block"),
                config.mid_block_channels(),
                BlockType::Mid,
                max_len,
                config,
            )?)
        } else {
            None
        };

        let version = if mid_block.is_some() {
            HotShotXLVersion::V2
        } else {
            HotShotXLVersion::V1
        };

        info!(
            mm_name = %mm_name,
            version = %version,
            encoding_max_len = max_len,
            "Built HotShotXL motion model"
        );
        debug!(
            down_blocks = down_blocks.len(),
            up_blocks = up_blocks.len(),
            loras = loras.as_ref().map(Vec::len),
            "Motion model structure"
        );

        Ok(Self {
            down_blocks,
            up_blocks,
            mid_block,
            encoding_max_len: max_len,
            version,
            injector_version: InjectorVersion::HotshotXlV1,
            default_video_length: config.default_video_length,
            video_length: config.default_video_length,
            mm_hash,
            mm_name,
            loras,
        })
    }

    pub fn down_blocks(&self) -> &[HotShotXLMotionModule] {
        &self.down_blocks
    }

    pub fn up_blocks(&self) -> &[HotShotXLMotionModule] {
        &self.up_blocks
    }

    pub fn mid_block(&self) -> Option<&HotShotXLMotionModule> {
        self.mid_block.as_ref()
    }

    pub fn encoding_max_len(&self) -> usize {
        self.encoding_max_len
    }

    pub fn version(&self) -> HotShotXLVersion {
        self.version
    }

    pub fn injector_version(&self) -> InjectorVersion {
        self.injector_version
    }

    /// Frame count of the last `set_video_length` call
    pub fn video_length(&self) -> usize {
        self.video_length
    }

    pub fn mm_hash(&self) -> &str {
        &self.mm_hash
    }

    pub fn mm_name(&self) -> &str {
        &self.mm_name
    }

    pub fn loras(&self) -> Option<&[MotionLoraInfo]> {
        self.loras.as_deref()
    }

    /// True whenever a LoRA list was supplied, including an empty one.
    // TODO: return false for an empty list once low-VRAM LoRA loading no longer
    // relies on this flag being set.
    pub fn has_loras(&self) -> bool {
        self.loras.is_some()
    }

    /// Down levels, then up levels, then the middle level if present
    fn modules_mut(&mut self) -> impl Iterator<Item = &mut HotShotXLMotionModule> {
        self.down_blocks
            .iter_mut()
            .chain(self.up_blocks.iter_mut())
            .chain(self.mid_block.iter_mut())
    }

    pub fn set_video_length(&mut self, video_length: usize, full_length: usize) {
        self.video_length = video_length;
        for block in self.modules_mut() {
            block.set_video_length(video_length, full_length);
        }
    }

    pub fn set_scale_multiplier(&mut self, multiplier: Option<f64>) {
        for block in self.modules_mut() {
            block.set_scale_multiplier(multiplier);
        }
    }

    pub fn set_masks(&mut self, masks: Option<&Tensor>, min_val: f64, max_val: f64) {
        for block in self.modules_mut() {
            block.set_masks(masks, min_val, max_val);
        }
    }

    pub fn set_sub_idxs(&mut self, sub_idxs: Option<&[usize]>) {
        for block in self.modules_mut() {
            block.set_sub_idxs(sub_idxs);
        }
    }

    pub fn reset_temp_vars(&mut self) {
        self.video_length = self.default_video_length;
        for block in self.modules_mut() {
            block.reset_temp_vars();
        }
    }
}
