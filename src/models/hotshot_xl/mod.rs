//! HotShotXL motion module
//!
//! Temporal attention layers injected into an SDXL UNet to make consecutive
//! frames coherent. Key components:
//! - Checkpoint inspection (positional encoding length, level count, mid level)
//! - `HotShotXLMotionWrapper` holding down/mid/up motion modules
//! - `TransformerTemporal` with frame-axis `TemporalAttention`
//! - Sinusoidal `PositionalEncoding` over frames

pub mod motion_module;
pub mod positional_encoding;
pub mod temporal_attention;
pub mod temporal_state;
pub mod transformer;
pub mod validation;
pub mod wrapper;

// Re-exports
pub use motion_module::{BlockType, HotShotXLMotionModule};
pub use positional_encoding::PositionalEncoding;
pub use temporal_attention::TemporalAttention;
pub use temporal_state::TemporalState;
pub use transformer::{TransformerBlock, TransformerTemporal};
pub use validation::{
    MotionCompatibilityError, MotionModuleLayout, has_mid_block, positional_encoding_max_len,
    validate_down_block_count,
};
pub use wrapper::{HotShotXLMotionWrapper, HotShotXLVersion, InjectorVersion, MotionModuleError};
