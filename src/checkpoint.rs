//! Checkpoint reading and normalization.
//!
//! The model artifact arrives in one of several shapes: a safetensors file,
//! a PyTorch pickle whose top level is the parameter mapping itself, or a
//! pickle wrapping that mapping under a well-known key. All of them resolve
//! to one normalized `Vec<(name, Tensor)>` here, so the loader only ever
//! sees a flat parameter list.

use std::path::Path;

use candle_core::{Device, Tensor, pickle, safetensors};

use crate::error::ModelError;

/// Wrapper keys checkpoints are known to nest the parameter mapping under,
/// tried in order.
pub const STATE_DICT_KEYS: [&str; 3] = ["model_state_dict", "state_dict", "model"];

/// Parameter name prefixes left over from training wrappers.
pub const STRIP_PREFIXES: [&str; 2] = ["module.", "model."];

/// Name of the classifier head's weight in the architecture this service
/// instantiates.
const HEAD_WEIGHT: &str = "classifier.weight";

/// Read a checkpoint file into a flat list of named tensors.
pub fn read_checkpoint(path: &Path, device: &Device) -> Result<Vec<(String, Tensor)>, ModelError> {
    if !path.exists() {
        return Err(ModelError::NotFound(path.to_path_buf()));
    }

    if path.extension().is_some_and(|ext| ext == "safetensors") {
        let tensors = safetensors::load(path, device)
            .map_err(|e| ModelError::Checkpoint(e.to_string()))?;
        let mut entries: Vec<_> = tensors.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        return Ok(entries);
    }

    // PyTorch pickle: try the known wrapper keys first, then the raw file.
    let mut last_err = None;
    for key in STATE_DICT_KEYS {
        match pickle::read_all_with_key(path, Some(key)) {
            Ok(entries) if !entries.is_empty() => return Ok(entries),
            Ok(_) => {}
            Err(e) => last_err = Some(e),
        }
    }
    match pickle::read_all(path) {
        Ok(entries) if !entries.is_empty() => Ok(entries),
        Ok(_) => Err(ModelError::Checkpoint(format!(
            "no tensors found in {}",
            path.display()
        ))),
        Err(e) => Err(ModelError::Checkpoint(
            last_err.map_or_else(|| e.to_string(), |le| format!("{e} (wrapped: {le})")),
        )),
    }
}

/// Strip training-wrapper prefixes from parameter names.
pub fn normalize_names(entries: Vec<(String, Tensor)>) -> Vec<(String, Tensor)> {
    entries
        .into_iter()
        .map(|(name, tensor)| {
            let stripped = STRIP_PREFIXES
                .iter()
                .find_map(|prefix| name.strip_prefix(prefix))
                .map_or(name.clone(), str::to_string);
            (stripped, tensor)
        })
        .collect()
}

/// Infer the output class count from the final linear layer's weight.
///
/// Prefers the head name this service's architecture uses; otherwise falls
/// back to the last rank-2 `.weight` entry, which for sequentially saved
/// state mappings is the classifier head.
pub fn infer_num_classes(entries: &[(String, Tensor)]) -> Option<usize> {
    if let Some((_, tensor)) = entries.iter().find(|(name, _)| name == HEAD_WEIGHT) {
        return tensor.dims2().ok().map(|(out, _)| out);
    }
    entries
        .iter()
        .rev()
        .find(|(name, tensor)| name.ends_with(".weight") && tensor.rank() == 2)
        .and_then(|(_, tensor)| tensor.dims2().ok().map(|(out, _)| out))
}
