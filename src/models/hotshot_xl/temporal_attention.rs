//! Attention across frames
//!
//! Feature sequences arrive as (B*F, S, C): every frame is a sequence of spatial
//! positions. TemporalAttention regroups them into (B*S, F, C) so each spatial
//! position attends over its own history of frames.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::positional_encoding::PositionalEncoding;
use crate::common::{AttentionCapability, CrossAttentionMM};

/// Relative tolerance used when comparing a scale multiplier against 1.0
const SCALE_MULTIPLIER_TOLERANCE: f64 = 1e-9;

fn is_close_to_one(value: f64) -> bool {
    (value - 1.0).abs() <= SCALE_MULTIPLIER_TOLERANCE * value.abs().max(1.0)
}

#[derive(Debug)]
pub struct TemporalAttention {
    attention: Box<dyn AttentionCapability>,
    pos_encoder: PositionalEncoding,
    scale: Option<f64>,
}

impl TemporalAttention {
    /// Build with the default `CrossAttentionMM` kernel
    pub fn new(
        vb: VarBuilder,
        query_dim: usize,
        context_dim: Option<usize>,
        heads: usize,
        dim_head: usize,
        max_length: usize,
    ) -> Result<Self> {
        let pos_encoder = PositionalEncoding::new(query_dim, max_length, vb.dtype(), vb.device())?;
        let attention = CrossAttentionMM::new(vb, query_dim, context_dim, heads, dim_head)?;
        Ok(Self::with_attention(Box::new(attention), pos_encoder))
    }

    /// Build around a host-provided attention kernel
    pub fn with_attention(
        attention: Box<dyn AttentionCapability>,
        pos_encoder: PositionalEncoding,
    ) -> Self {
        Self {
            attention,
            pos_encoder,
            scale: None,
        }
    }

    pub fn pos_encoder(&self) -> &PositionalEncoding {
        &self.pos_encoder
    }

    /// Multiplier on the kernel's score scale, `None` when the default applies
    pub fn scale(&self) -> Option<f64> {
        self.scale
    }

    /// `None` or a multiplier of 1.0 restores the kernel's default scale
    pub fn set_scale_multiplier(&mut self, multiplier: Option<f64>) {
        self.scale = multiplier.filter(|&m| !is_close_to_one(m));
    }

    /// `hidden_states`: (B*F, S, C) with F = `number_of_frames`
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        encoder_hidden_states: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        number_of_frames: usize,
        scale_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (batch_frames, sequence_length, channels) = hidden_states.dims3()?;
        if number_of_frames == 0 || batch_frames % number_of_frames != 0 {
            candle_core::bail!(
                "batch of {batch_frames} is not a whole number of {number_of_frames}-frame videos"
            );
        }
        let batch = batch_frames / number_of_frames;

        // (b f) s c -> (b s) f c
        let h = hidden_states
            .reshape((batch, number_of_frames, sequence_length, channels))?
            .permute((0, 2, 1, 3))?
            .reshape((batch * sequence_length, number_of_frames, channels))?;
        let h = self.pos_encoder.forward(&h, number_of_frames)?;

        // b n c -> (b s) n c
        let context = encoder_hidden_states
            .map(|ehs| {
                let (b, n, c) = ehs.dims3()?;
                ehs.unsqueeze(1)?
                    .repeat((1, sequence_length, 1, 1))?
                    .reshape((b * sequence_length, n, c))
            })
            .transpose()?;

        let h = self.attention.forward(
            &h,
            context.as_ref(),
            attention_mask,
            scale_mask,
            self.scale,
        )?;

        // (b s) f c -> (b f) s c
        h.reshape((batch, sequence_length, number_of_frames, channels))?
            .permute((0, 2, 1, 3))?
            .reshape((batch_frames, sequence_length, channels))
    }
}
