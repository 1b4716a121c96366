//! Motion LoRA descriptors
//!
//! Applying LoRA weights is the host's job; the motion wrapper only carries the
//! list so the host can tell whether the loaded model has LoRAs attached.

use serde::{Deserialize, Serialize};

/// One motion LoRA attached to a motion model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionLoraInfo {
    pub name: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
    #[serde(default)]
    pub hash: String,
}

fn default_strength() -> f64 {
    1.0
}

impl MotionLoraInfo {
    pub fn new(name: impl Into<String>, strength: f64) -> Self {
        Self {
            name: name.into(),
            strength,
            hash: String::new(),
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_json() {
        let lora: MotionLoraInfo = serde_json::from_str(r#"{"name": "zoom_in"}"#).unwrap();
        assert_eq!(lora, MotionLoraInfo::new("zoom_in", 1.0));
    }
}
