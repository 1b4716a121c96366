//! Candle-Motion: HotShotXL temporal motion modules for Candle.
//!
//! This crate provides the model definition of HotShotXL motion modules: the
//! temporal transformers a video pipeline injects into an SDXL UNet, built to
//! match the tensor layout of published motion checkpoints.

pub mod common;
pub mod config;
pub mod loader;
pub mod lora;
pub mod models;

pub use config::{ConfigError, HotShotXLConfig};
pub use loader::{LoaderError, list_tensor_names, load_motion_config, load_motion_state_dict};
pub use lora::MotionLoraInfo;
pub use models::hotshot_xl::*;
