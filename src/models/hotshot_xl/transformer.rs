//! Temporal transformer stack of a HotShotXL motion module

use candle_core::{Module, Result, Tensor};
use candle_nn::{LayerNorm, Linear, VarBuilder, layer_norm, linear};

use super::temporal_attention::TemporalAttention;
use super::temporal_state::TemporalState;
use crate::common::{FeedForward, GroupNormAD};
use crate::config::HotShotXLConfig;

/// `depth` x (LayerNorm -> TemporalAttention), then LayerNorm -> FeedForward,
/// each with a residual connection.
#[derive(Debug)]
pub struct TransformerBlock {
    attention_blocks: Vec<TemporalAttention>,
    norms: Vec<LayerNorm>,
    ff: FeedForward,
    ff_norm: LayerNorm,
    is_cross: bool,
}

impl TransformerBlock {
    pub fn new(
        vb: VarBuilder,
        dim: usize,
        num_attention_heads: usize,
        attention_head_dim: usize,
        max_length: usize,
        config: &HotShotXLConfig,
    ) -> Result<Self> {
        let depth = config.attention_block_depth;
        let mut attention_blocks = Vec::with_capacity(depth);
        let mut norms = Vec::with_capacity(depth);

        for i in 0..depth {
            attention_blocks.push(TemporalAttention::new(
                vb.pp("attention_blocks").pp(i),
                dim,
                config.cross_attention_dim,
                num_attention_heads,
                attention_head_dim,
                max_length,
            )?);
            norms.push(layer_norm(dim, config.layer_norm_eps, vb.pp("norms").pp(i))?);
        }

        Ok(Self {
            attention_blocks,
            norms,
            ff: FeedForward::new(vb.pp("ff"), dim, config.ff_mult, config.geglu)?,
            ff_norm: layer_norm(dim, config.layer_norm_eps, vb.pp("ff_norm"))?,
            is_cross: config.cross_attention_dim.is_some(),
        })
    }

    pub fn is_cross(&self) -> bool {
        self.is_cross
    }

    pub fn attention_blocks(&self) -> &[TemporalAttention] {
        &self.attention_blocks
    }

    pub fn set_scale_multiplier(&mut self, multiplier: Option<f64>) {
        for block in &mut self.attention_blocks {
            block.set_scale_multiplier(multiplier);
        }
    }

    pub fn forward(
        &self,
        hidden_states: &Tensor,
        encoder_hidden_states: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        number_of_frames: usize,
        scale_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let encoder_hidden_states = encoder_hidden_states.filter(|_| self.is_cross);

        let mut hidden_states = hidden_states.clone();
        for (block, norm) in self.attention_blocks.iter().zip(&self.norms) {
            let norm_hidden_states = norm.forward(&hidden_states)?;
            hidden_states = (block.forward(
                &norm_hidden_states,
                encoder_hidden_states,
                attention_mask,
                number_of_frames,
                scale_mask,
            )? + &hidden_states)?;
        }

        let norm_hidden_states = self.ff_norm.forward(&hidden_states)?;
        self.ff.forward(&norm_hidden_states)? + hidden_states
    }
}

/// GroupNorm -> proj_in -> TransformerBlocks -> proj_out, plus the input residual.
///
/// Input and output are (B*F, C, H, W) feature maps of one UNet level. The
/// temporal context (frame count, scale mask) is set by the host beforehand.
#[derive(Debug)]
pub struct TransformerTemporal {
    norm: GroupNormAD,
    proj_in: Linear,
    transformer_blocks: Vec<TransformerBlock>,
    proj_out: Linear,
    in_channels: usize,
    state: TemporalState,
}

impl TransformerTemporal {
    pub fn new(
        vb: VarBuilder,
        in_channels: usize,
        max_length: usize,
        config: &HotShotXLConfig,
    ) -> Result<Self> {
        let num_attention_heads = config.num_attention_heads;
        let attention_head_dim = config.attention_head_dim(in_channels);
        let inner_dim = num_attention_heads * attention_head_dim;

        let norm = GroupNormAD::new(
            config.norm_num_groups,
            in_channels,
            config.group_norm_eps,
            config.upcast_group_norm,
            vb.pp("norm"),
        )?;
        let proj_in = linear(in_channels, inner_dim, vb.pp("proj_in"))?;

        let mut transformer_blocks = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            transformer_blocks.push(TransformerBlock::new(
                vb.pp("transformer_blocks").pp(i),
                inner_dim,
                num_attention_heads,
                attention_head_dim,
                max_length,
                config,
            )?);
        }

        let proj_out = linear(inner_dim, in_channels, vb.pp("proj_out"))?;

        Ok(Self {
            norm,
            proj_in,
            transformer_blocks,
            proj_out,
            in_channels,
            state: TemporalState::new(config.default_video_length),
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn transformer_blocks(&self) -> &[TransformerBlock] {
        &self.transformer_blocks
    }

    pub fn state(&self) -> &TemporalState {
        &self.state
    }

    pub fn set_video_length(&mut self, video_length: usize, full_length: usize) {
        self.state.set_video_length(video_length, full_length);
    }

    pub fn set_scale_multiplier(&mut self, multiplier: Option<f64>) {
        for block in &mut self.transformer_blocks {
            block.set_scale_multiplier(multiplier);
        }
    }

    pub fn set_masks(&mut self, masks: Option<Tensor>, min_val: f64, max_val: f64) {
        self.state.set_masks(masks, min_val, max_val);
    }

    pub fn set_sub_idxs(&mut self, sub_idxs: Option<Vec<usize>>) {
        self.state.set_sub_idxs(sub_idxs);
    }

    pub fn reset_temp_vars(&mut self) {
        self.state.reset();
    }

    pub fn forward_with_context(
        &self,
        hidden_states: &Tensor,
        encoder_hidden_states: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (batch, channel, height, width) = hidden_states.dims4()?;
        let residual = hidden_states;

        let scale_mask = self.state.scale_mask(hidden_states)?;

        let h = self.norm.forward(hidden_states)?;
        // (B, C, H, W) -> (B, H*W, C)
        let h = h
            .permute((0, 2, 3, 1))?
            .reshape((batch, height * width, channel))?;
        let mut h = self.proj_in.forward(&h)?;

        for block in &self.transformer_blocks {
            h = block.forward(
                &h,
                encoder_hidden_states,
                attention_mask,
                self.state.video_length(),
                scale_mask.as_ref(),
            )?;
        }

        let h = self.proj_out.forward(&h)?;
        let h = h
            .reshape((batch, height, width, channel))?
            .permute((0, 3, 1, 2))?
            .contiguous()?;
        h + residual
    }
}

impl Module for TransformerTemporal {
    fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        self.forward_with_context(hidden_states, None, None)
    }
}
