//! Sinusoidal positional encoding over the frame axis

use candle_core::{DType, Device, Result, Tensor};

use crate::config::POSITIONAL_ENCODING_SCALE;

/// Fixed sinusoidal table as in "Attention Is All You Need".
///
/// Even channels hold `sin(pos * w_i)`, odd channels `cos(pos * w_i)` with
/// `w_i = exp(-ln(10000) * 2i / dim)`. The table is `[1, max_length, dim]` so a
/// prefix broadcasts over the batch axis.
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    positional_encoding: Tensor,
    max_length: usize,
}

impl PositionalEncoding {
    pub fn new(dim: usize, max_length: usize, dtype: DType, device: &Device) -> Result<Self> {
        let log_scale = -POSITIONAL_ENCODING_SCALE.ln() / dim as f64;
        let mut table = Vec::with_capacity(max_length * dim);
        for pos in 0..max_length {
            for col in 0..dim {
                let freq = ((col - col % 2) as f64 * log_scale).exp();
                let angle = pos as f64 * freq;
                let value = if col % 2 == 0 { angle.sin() } else { angle.cos() };
                table.push(value as f32);
            }
        }
        let positional_encoding =
            Tensor::from_vec(table, (1, max_length, dim), device)?.to_dtype(dtype)?;
        Ok(Self {
            positional_encoding,
            max_length,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// The full `[1, max_length, dim]` table
    pub fn table(&self) -> &Tensor {
        &self.positional_encoding
    }

    /// Add the first `length` rows of the table to `hidden_states` (B, length, dim)
    pub fn forward(&self, hidden_states: &Tensor, length: usize) -> Result<Tensor> {
        if length > self.max_length {
            candle_core::bail!(
                "sequence of {length} frames exceeds positional encoding max length {}",
                self.max_length
            );
        }
        let pe = self
            .positional_encoding
            .narrow(1, 0, length)?
            .to_dtype(hidden_states.dtype())?;
        hidden_states.broadcast_add(&pe)
    }
}
