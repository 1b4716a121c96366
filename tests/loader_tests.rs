//! Checkpoint round trips through safetensors
//!
//! A wrapper built over random weights is saved with its positional encodings,
//! reloaded with `load_motion_state_dict` and rebuilt from the state dict. The
//! rebuilt tree must pick up every parameter by name.

use std::collections::HashMap;

use candle_core::{DType, Device, Module, Tensor};
use candle_motion::*;
use candle_nn::{VarBuilder, VarMap};
use tempfile::tempdir;

fn small_config() -> HotShotXLConfig {
    HotShotXLConfig {
        block_out_channels: [16, 32, 64],
        norm_num_groups: 8,
        attention_block_depth: 1,
        ..HotShotXLConfig::default()
    }
}

fn marker_state_dict(with_mid: bool) -> HashMap<String, Tensor> {
    let device = Device::Cpu;
    let mut sd = HashMap::from([
        (
            "down_blocks.0.temporal_attentions.0.transformer_blocks.0.attention_blocks.0.pos_encoder.positional_encoding".to_string(),
            Tensor::zeros((1, 32, 16), DType::F32, &device).unwrap(),
        ),
        (
            "down_blocks.2.temporal_attentions.0.norm.weight".to_string(),
            Tensor::zeros(64, DType::F32, &device).unwrap(),
        ),
    ]);
    if with_mid {
        sd.insert(
            "mid_block.temporal_attentions.0.norm.weight".to_string(),
            Tensor::zeros(64, DType::F32, &device).unwrap(),
        );
    }
    sd
}

/// Random weights of a whole tree, plus one positional encoding buffer per attention
fn random_checkpoint(with_mid: bool) -> anyhow::Result<HashMap<String, Tensor>> {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    // Building the tree registers every parameter in the VarMap
    HotShotXLMotionWrapper::new(
        &marker_state_dict(with_mid),
        vb,
        "",
        Some("random"),
        None,
        &small_config(),
    )?;

    let mut checkpoint: HashMap<String, Tensor> = varmap
        .data()
        .lock()
        .unwrap()
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect();

    let pe_keys: Vec<String> = checkpoint
        .keys()
        .filter_map(|k| k.strip_suffix(".to_q.weight"))
        .map(|prefix| format!("{prefix}.pos_encoder.positional_encoding"))
        .collect();
    for key in pe_keys {
        let channels = checkpoint[&key.replace("pos_encoder.positional_encoding", "to_q.weight")]
            .dim(1)?;
        checkpoint.insert(key, Tensor::zeros((1, 32, channels), DType::F32, &device)?);
    }
    Ok(checkpoint)
}

#[test]
fn test_roundtrip_through_safetensors() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let checkpoint = random_checkpoint(true)?;

    let dir = tempdir()?;
    let path = dir.path().join("hsxl_v2.safetensors");
    candle_core::safetensors::save(&checkpoint, &path)?;

    let names = list_tensor_names(&path)?;
    assert_eq!(names.len(), checkpoint.len());
    assert!(names.iter().any(|n| n.starts_with("mid_block.temporal_attentions.0.")));

    let state_dict = load_motion_state_dict(&path, &device)?;
    let reloaded = HotShotXLMotionWrapper::from_state_dict(
        state_dict,
        DType::F32,
        &device,
        "hash",
        Some("hsxl_v2.safetensors"),
        None,
        &small_config(),
    )?;
    assert_eq!(reloaded.version(), HotShotXLVersion::V2);
    assert_eq!(reloaded.encoding_max_len(), 32);

    // Same weights under the same names give the same output
    let direct = HotShotXLMotionWrapper::new(
        &checkpoint,
        VarBuilder::from_tensors(checkpoint.clone(), DType::F32, &device),
        "hash",
        Some("hsxl_v2.safetensors"),
        None,
        &small_config(),
    )?;
    let x = Tensor::randn(0f32, 1.0, (8, 64, 2, 2), &device)?;
    let a = reloaded.mid_block().unwrap().temporal_attentions()[0].forward(&x)?;
    let b = direct.mid_block().unwrap().temporal_attentions()[0].forward(&x)?;
    let diff = (a - b)?.abs()?.max_all()?.to_scalar::<f32>()?;
    assert!(diff < 1e-5);
    Ok(())
}

#[test]
fn test_missing_weights_surface_as_candle_error() -> anyhow::Result<()> {
    let device = Device::Cpu;
    let mut checkpoint = random_checkpoint(false)?;
    checkpoint.retain(|k, _| !k.starts_with("up_blocks.2."));

    let err = HotShotXLMotionWrapper::from_state_dict(
        checkpoint,
        DType::F32,
        &device,
        "hash",
        Some("partial.safetensors"),
        None,
        &small_config(),
    )
    .unwrap_err();
    assert!(matches!(err, MotionModuleError::Candle(_)));
    Ok(())
}

#[test]
fn test_prefixed_checkpoint_needs_stripping() -> anyhow::Result<()> {
    let checkpoint: HashMap<String, Tensor> = random_checkpoint(false)?
        .into_iter()
        .map(|(k, v)| (format!("motion_module.{k}"), v))
        .collect();

    // The down level index is no longer the second key segment
    let err = HotShotXLMotionWrapper::from_state_dict(
        checkpoint.clone(),
        DType::F32,
        &Device::Cpu,
        "hash",
        Some("prefixed.safetensors"),
        None,
        &small_config(),
    )
    .unwrap_err();
    assert!(matches!(err, MotionModuleError::IncompatibleCheckpoint(_)));

    let stripped = loader::strip_key_prefix(checkpoint, "motion_module.");
    let wrapper = HotShotXLMotionWrapper::from_state_dict(
        stripped,
        DType::F32,
        &Device::Cpu,
        "hash",
        Some("prefixed.safetensors"),
        None,
        &small_config(),
    )?;
    assert_eq!(wrapper.version(), HotShotXLVersion::V1);
    Ok(())
}

#[test]
fn test_config_from_json_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&small_config())?)?;

    let config: HotShotXLConfig = load_motion_config(&path)?;
    assert_eq!(config, small_config());
    Ok(())
}

#[test]
fn test_inconsistent_config_file_rejected() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"block_out_channels": [16, 30, 64], "norm_num_groups": 2}"#)?;

    let err = load_motion_config(&path).unwrap_err();
    assert!(matches!(err, LoaderError::InvalidConfig { .. }));
    Ok(())
}
