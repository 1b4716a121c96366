//! Normalization layers shared by the motion modules

use candle_core::{DType, Module, Result, Tensor};
use candle_nn::{GroupNorm, VarBuilder, init};

/// GroupNorm over (B, C, H, W) feature maps with optional float32 upcast.
///
/// Half-precision group statistics drift on large feature maps, so hosts running
/// in F16/BF16 can force the whole normalization into F32.
#[derive(Debug, Clone)]
pub struct GroupNormAD {
    inner: GroupNorm,
    upcast: bool,
}

impl GroupNormAD {
    pub fn new(
        num_groups: usize,
        num_channels: usize,
        eps: f64,
        upcast: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut weight = vb.get_with_hints(num_channels, "weight", init::Init::Const(1.))?;
        let mut bias = vb.get_with_hints(num_channels, "bias", init::Init::Const(0.))?;
        if upcast {
            weight = weight.to_dtype(DType::F32)?;
            bias = bias.to_dtype(DType::F32)?;
        }
        Ok(Self {
            inner: GroupNorm::new(weight, bias, num_channels, num_groups, eps)?,
            upcast,
        })
    }

    pub fn is_upcast(&self) -> bool {
        self.upcast
    }
}

impl Module for GroupNormAD {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        if !self.upcast {
            return self.inner.forward(x);
        }
        let input_dtype = x.dtype();
        self.inner
            .forward(&x.to_dtype(DType::F32)?)?
            .to_dtype(input_dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_group_norm_normalizes_groups() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let norm = GroupNormAD::new(2, 4, 1e-6, false, vb)?;

        let x = Tensor::randn(3f32, 2.0, (1, 4, 4, 4), &device)?;
        let out = norm.forward(&x)?;
        assert_eq!(out.dims(), x.dims());

        // Default affine params are identity, so each group has zero mean.
        let group0 = out.narrow(1, 0, 2)?.flatten_all()?;
        let mean = group0.mean_all()?.to_scalar::<f32>()?;
        assert!(mean.abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_upcast_preserves_input_dtype() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let norm = GroupNormAD::new(2, 4, 1e-6, true, vb)?;
        assert!(norm.is_upcast());

        let x = Tensor::randn(0f32, 1.0, (2, 4, 2, 2), &device)?.to_dtype(DType::BF16)?;
        let out = norm.forward(&x)?;
        assert_eq!(out.dtype(), DType::BF16);
        assert_eq!(out.dims(), &[2, 4, 2, 2]);
        Ok(())
    }
}
