//! Feed-forward network in the `ff.net.{0,2}` checkpoint layout

use candle_core::{D, Module, Result, Tensor};
use candle_nn::{Linear, VarBuilder, linear};

/// Input projection of the feed-forward: GEGLU or a plain GELU projection
#[derive(Debug)]
enum FeedForwardIn {
    Geglu { proj: Linear, inner_dim: usize },
    Gelu { proj: Linear },
}

impl FeedForwardIn {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Self::Geglu { proj, inner_dim } => {
                let h = proj.forward(x)?;
                let value = h.narrow(D::Minus1, 0, *inner_dim)?;
                let gate = h.narrow(D::Minus1, *inner_dim, *inner_dim)?;
                value * gate.gelu_erf()?
            }
            Self::Gelu { proj } => proj.forward(x)?.gelu_erf(),
        }
    }
}

/// Feed-forward network (dim -> dim * mult -> dim)
#[derive(Debug)]
pub struct FeedForward {
    proj_in: FeedForwardIn,
    proj_out: Linear,
}

impl FeedForward {
    pub fn new(vb: VarBuilder, dim: usize, mult: usize, geglu: bool) -> Result<Self> {
        let inner_dim = dim * mult;
        let net = vb.pp("net");
        let proj_in = if geglu {
            FeedForwardIn::Geglu {
                proj: linear(dim, inner_dim * 2, net.pp("0").pp("proj"))?,
                inner_dim,
            }
        } else {
            // Sequential(Linear, GELU)
            FeedForwardIn::Gelu {
                proj: linear(dim, inner_dim, net.pp("0").pp("0"))?,
            }
        };
        // net.1 is dropout and carries no weights
        let proj_out = linear(inner_dim, dim, net.pp("2"))?;
        Ok(Self { proj_in, proj_out })
    }
}

impl Module for FeedForward {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.proj_in.forward(x)?;
        self.proj_out.forward(&h)
    }
}
