//! Motion module of one UNet resolution level

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::transformer::TransformerTemporal;
use crate::config::HotShotXLConfig;

/// UNet level a motion module is injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Down,
    Mid,
    Up,
}

impl BlockType {
    /// TransformerTemporals per level: one per resnet/attention pair of the host
    pub fn num_transformers(self) -> usize {
        match self {
            Self::Down => 2,
            Self::Mid => 1,
            Self::Up => 3,
        }
    }
}

/// `temporal_attentions.{i}` of one level
#[derive(Debug)]
pub struct HotShotXLMotionModule {
    temporal_attentions: Vec<TransformerTemporal>,
    block_type: BlockType,
}

impl HotShotXLMotionModule {
    pub fn new(
        vb: VarBuilder,
        in_channels: usize,
        block_type: BlockType,
        max_length: usize,
        config: &HotShotXLConfig,
    ) -> Result<Self> {
        let vb = vb.pp("temporal_attentions");
        let temporal_attentions = (0..block_type.num_transformers())
            .map(|i| TransformerTemporal::new(vb.pp(i), in_channels, max_length, config))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            temporal_attentions,
            block_type,
        })
    }

    pub fn block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn temporal_attentions(&self) -> &[TransformerTemporal] {
        &self.temporal_attentions
    }

    pub fn len(&self) -> usize {
        self.temporal_attentions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temporal_attentions.is_empty()
    }

    /// Run the `index`-th TransformerTemporal of this level
    pub fn forward(
        &self,
        index: usize,
        hidden_states: &Tensor,
        encoder_hidden_states: Option<&Tensor>,
    ) -> Result<Tensor> {
        let Some(tt) = self.temporal_attentions.get(index) else {
            candle_core::bail!(
                "{:?} motion module has {} temporal attentions, got index {index}",
                self.block_type,
                self.temporal_attentions.len()
            );
        };
        tt.forward_with_context(hidden_states, encoder_hidden_states, None)
    }

    pub fn set_video_length(&mut self, video_length: usize, full_length: usize) {
        for tt in &mut self.temporal_attentions {
            tt.set_video_length(video_length, full_length);
        }
    }

    pub fn set_scale_multiplier(&mut self, multiplier: Option<f64>) {
        for tt in &mut self.temporal_attentions {
            tt.set_scale_multiplier(multiplier);
        }
    }

    pub fn set_masks(&mut self, masks: Option<&Tensor>, min_val: f64, max_val: f64) {
        for tt in &mut self.temporal_attentions {
            tt.set_masks(masks.cloned(), min_val, max_val);
        }
    }

    pub fn set_sub_idxs(&mut self, sub_idxs: Option<&[usize]>) {
        for tt in &mut self.temporal_attentions {
            tt.set_sub_idxs(sub_idxs.map(<[usize]>::to_vec));
        }
    }

    pub fn reset_temp_vars(&mut self) {
        for tt in &mut self.temporal_attentions {
            tt.reset_temp_vars();
        }
    }
}
