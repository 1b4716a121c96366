//! Attention capability used by the temporal layers
//!
//! The temporal modules only rearrange tensors around an attention call. The call
//! itself goes through [`AttentionCapability`], so hosts can swap in their own
//! kernel. [`CrossAttentionMM`] is the default and matches the `to_q`/`to_k`/
//! `to_v`/`to_out.0` layout of AnimateDiff-style checkpoints.
//!
//! Score computation dispatches per device:
//! - Metal: SDPA kernel via candle_nn::ops::sdpa (unmasked only)
//! - Everything else: basic scaled dot-product attention

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder, linear, linear_no_bias};

/// Multi-head attention as consumed by `TemporalAttention`.
///
/// * `hidden_states` - Query input (B, N, query_dim)
/// * `context` - Optional key/value input (B, M, context_dim); self-attention when `None`
/// * `mask` - Optional additive bias broadcastable to (B, heads, N, M)
/// * `scale_mask` - Optional multiplier broadcastable to the projected keys (B, M, inner_dim)
/// * `scale` - Multiplier on the kernel's default score scale; `None` keeps the default
///
/// Returns a tensor shaped like `hidden_states`.
pub trait AttentionCapability: std::fmt::Debug {
    fn forward(
        &self,
        hidden_states: &Tensor,
        context: Option<&Tensor>,
        mask: Option<&Tensor>,
        scale_mask: Option<&Tensor>,
        scale: Option<f64>,
    ) -> Result<Tensor>;
}

/// Cross/self attention with optional key scaling
#[derive(Debug)]
pub struct CrossAttentionMM {
    to_q: Linear,
    to_k: Linear,
    to_v: Linear,
    to_out: Linear,
    heads: usize,
    dim_head: usize,
    default_scale: f64,
}

impl CrossAttentionMM {
    pub fn new(
        vb: VarBuilder,
        query_dim: usize,
        context_dim: Option<usize>,
        heads: usize,
        dim_head: usize,
    ) -> Result<Self> {
        let inner_dim = heads * dim_head;
        let context_dim = context_dim.unwrap_or(query_dim);

        Ok(Self {
            to_q: linear_no_bias(query_dim, inner_dim, vb.pp("to_q"))?,
            to_k: linear_no_bias(context_dim, inner_dim, vb.pp("to_k"))?,
            to_v: linear_no_bias(context_dim, inner_dim, vb.pp("to_v"))?,
            to_out: linear(inner_dim, query_dim, vb.pp("to_out").pp("0"))?,
            heads,
            dim_head,
            default_scale: (dim_head as f64).powf(-0.5),
        })
    }

    pub fn heads(&self) -> usize {
        self.heads
    }

    pub fn default_scale(&self) -> f64 {
        self.default_scale
    }

    /// (B, N, H*D) -> (B, H, N, D)
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        x.reshape((batch, seq_len, self.heads, self.dim_head))?
            .transpose(1, 2)?
            .contiguous()
    }
}

impl AttentionCapability for CrossAttentionMM {
    fn forward(
        &self,
        hidden_states: &Tensor,
        context: Option<&Tensor>,
        mask: Option<&Tensor>,
        scale_mask: Option<&Tensor>,
        scale: Option<f64>,
    ) -> Result<Tensor> {
        let context = context.unwrap_or(hidden_states);
        let (batch, seq_len, _) = hidden_states.dims3()?;

        let q = self.to_q.forward(hidden_states)?;
        let mut k = self.to_k.forward(context)?;
        let v = self.to_v.forward(context)?;

        if let Some(scale_mask) = scale_mask {
            k = k.broadcast_mul(&scale_mask.to_dtype(k.dtype())?)?;
        }

        let q = self.split_heads(&q)?;
        let k = self.split_heads(&k)?;
        let v = self.split_heads(&v)?;

        let scale = self.default_scale * scale.unwrap_or(1.0);
        let out = attention_dispatch(&q, &k, &v, mask, scale)?;

        let out = out
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, ()))?
            .to_dtype(hidden_states.dtype())?;
        self.to_out.forward(&out)
    }
}

/// Scaled dot-product attention over (B, H, N, D) tensors
pub fn attention_dispatch(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
    scale: f64,
) -> Result<Tensor> {
    match (q.device(), mask) {
        // candle_nn::ops::sdpa expects (bs, qhead, seq, hidden)
        (Device::Metal(_), None) => candle_nn::ops::sdpa(q, k, v, None, false, scale as f32, 1.0),
        _ => attention_basic(q, k, v, mask, scale),
    }
}

/// Basic scaled dot-product attention, softmax in float32
fn attention_basic(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
    scale: f64,
) -> Result<Tensor> {
    let mut attn_weights = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;

    if let Some(m) = mask {
        // (B, N, M) -> (B, 1, N, M)
        let m = if m.rank() == 3 { m.unsqueeze(1)? } else { m.clone() };
        attn_weights = attn_weights.broadcast_add(&m.to_dtype(attn_weights.dtype())?)?;
    }

    let attn_probs = candle_nn::ops::softmax_last_dim(&attn_weights.to_dtype(DType::F32)?)?
        .to_dtype(v.dtype())?;
    attn_probs.matmul(v)
}
