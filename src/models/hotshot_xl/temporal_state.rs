//! Per-invocation temporal context of a TransformerTemporal
//!
//! Set by the host before each denoising step and read during forward. The
//! scale mask derived here multiplies the attention keys frame by frame.

use candle_core::{DType, IndexOp, Result, Tensor};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TemporalState {
    default_length: usize,
    video_length: usize,
    full_length: usize,
    scale_min: f64,
    scale_max: f64,
    raw_scale_mask: Option<Tensor>,
    sub_idxs: Option<Vec<usize>>,
}

impl TemporalState {
    pub fn new(default_length: usize) -> Self {
        Self {
            default_length,
            video_length: default_length,
            full_length: default_length,
            scale_min: 1.0,
            scale_max: 1.0,
            raw_scale_mask: None,
            sub_idxs: None,
        }
    }

    pub fn video_length(&self) -> usize {
        self.video_length
    }

    pub fn full_length(&self) -> usize {
        self.full_length
    }

    pub fn sub_idxs(&self) -> Option<&[usize]> {
        self.sub_idxs.as_deref()
    }

    pub fn scale_range(&self) -> (f64, f64) {
        (self.scale_min, self.scale_max)
    }

    pub fn has_scale_mask(&self) -> bool {
        self.raw_scale_mask.is_some()
    }

    pub fn set_video_length(&mut self, video_length: usize, full_length: usize) {
        self.video_length = video_length;
        self.full_length = full_length;
    }

    /// `masks` is (H, W), (N, H, W) or (N, 1, H, W) in any resolution
    pub fn set_masks(&mut self, masks: Option<Tensor>, min_val: f64, max_val: f64) {
        self.scale_min = min_val;
        self.scale_max = max_val;
        self.raw_scale_mask = masks;
    }

    pub fn set_sub_idxs(&mut self, sub_idxs: Option<Vec<usize>>) {
        self.sub_idxs = sub_idxs;
    }

    /// Back to the state of a freshly built module
    pub fn reset(&mut self) {
        *self = Self::new(self.default_length);
    }

    /// Derive the key multiplier for feature maps shaped like `hidden_states`
    /// (B*F, C, H, W).
    ///
    /// Returns `None` without a mask. Otherwise the mask is resized to (H, W),
    /// stretched to `full_length` frames, clamped to the scale range and laid out
    /// as (B*H*W, frames, 1), with frames narrowed to `sub_idxs` when set.
    pub fn scale_mask(&self, hidden_states: &Tensor) -> Result<Option<Tensor>> {
        let Some(raw) = &self.raw_scale_mask else {
            return Ok(None);
        };
        let (batch, _, height, width) = hidden_states.dims4()?;

        let mask = self.prepare_mask_batch(raw, height, width)?;
        let mask = repeat_to_batch_size(&mask, self.full_length)?;
        let mask = mask.clamp(self.scale_min, self.scale_max)?;

        // (F, 1, H, W) -> (F, H*W, 1) -> (H*W, F, 1), matching the attention keys
        let mask = mask
            .permute((0, 2, 3, 1))?
            .reshape((self.full_length, height * width, 1))?
            .permute((1, 0, 2))?
            .contiguous()?;

        let batched_number = batch / self.video_length.max(1);
        let mask = if batched_number > 1 {
            Tensor::cat(&vec![&mask; batched_number], 0)?
        } else {
            mask
        };

        let mask = mask
            .to_device(hidden_states.device())?
            .to_dtype(hidden_states.dtype())?;

        let mask = match &self.sub_idxs {
            Some(idxs) => {
                let idxs = idxs
                    .iter()
                    .map(|&i| {
                        u32::try_from(i).map_err(|_| {
                            candle_core::Error::Msg(format!("sub index {i} does not fit in u32"))
                        })
                    })
                    .collect::<Result<Vec<u32>>>()?;
                let idxs = Tensor::new(idxs.as_slice(), mask.device())?;
                mask.index_select(&idxs, 1)?
            }
            None => mask,
        };

        debug!(
            scale_mask_shape = ?mask.dims(),
            batched_number,
            "Derived temporal scale mask"
        );
        Ok(Some(mask))
    }

    /// Bring the raw mask to (N, 1, height, width) in float32
    fn prepare_mask_batch(&self, raw: &Tensor, height: usize, width: usize) -> Result<Tensor> {
        let mask = raw.to_dtype(DType::F32)?;
        let mask = match mask.rank() {
            2 => mask.unsqueeze(0)?.unsqueeze(0)?,
            3 => mask.unsqueeze(1)?,
            4 => mask.i((.., 0..1))?,
            rank => candle_core::bail!("scale mask must have 2 to 4 dims, got {rank}"),
        };
        let (_, _, mask_h, mask_w) = mask.dims4()?;
        if (mask_h, mask_w) == (height, width) {
            Ok(mask)
        } else {
            mask.contiguous()?.upsample_nearest2d(height, width)
        }
    }
}

/// Repeat or truncate along dim 0 to exactly `batch_size` entries
fn repeat_to_batch_size(tensor: &Tensor, batch_size: usize) -> Result<Tensor> {
    let current = tensor.dim(0)?;
    if current == batch_size {
        return Ok(tensor.clone());
    }
    if current > batch_size {
        return tensor.narrow(0, 0, batch_size);
    }
    let repeats = batch_size.div_ceil(current);
    let mut shape = vec![1; tensor.rank()];
    shape[0] = repeats;
    tensor.repeat(shape)?.narrow(0, 0, batch_size)
}
