//! Building blocks shared by the motion modules
//!
//! - **attention**: attention capability trait and the default `CrossAttentionMM`
//! - **feed_forward**: GEGLU feed-forward in the checkpoint's `ff.net` layout
//! - **norms**: GroupNorm with optional float32 upcast

pub mod attention;
pub mod feed_forward;
pub mod norms;

pub use attention::{AttentionCapability, CrossAttentionMM, attention_dispatch};
pub use feed_forward::FeedForward;
pub use norms::GroupNormAD;
