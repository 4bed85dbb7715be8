use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor};

use crate::error::DnnError;

/// The length of the `model.` prefix added to every parameter name at training time.
pub const TRAINING_PREFIX_LEN: usize = 6;

/// Read the tensors of a weights file.
///
/// Files with the `safetensors` extension are read as safetensors, anything
/// else as a PyTorch checkpoint whose `state_dict` entry holds the tensors.
///
/// # Arguments
///
/// * `path` - The path to the weights file.
/// * `device` - The device the tensors are loaded to.
///
/// # Returns
///
/// The tensors keyed by their name in the file.
pub fn load_state_dict(
    path: impl AsRef<Path>,
    device: &Device,
) -> Result<Vec<(String, Tensor)>, DnnError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DnnError::WeightsNotFound(path.to_owned()));
    }

    let is_safetensors = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"));

    let tensors = if is_safetensors {
        candle_core::safetensors::load(path, device)?
            .into_iter()
            .collect::<Vec<_>>()
    } else {
        candle_core::pickle::read_all_with_key(path, Some("state_dict"))?
            .into_iter()
            .map(|(name, t)| Ok((name, t.to_device(device)?)))
            .collect::<Result<Vec<_>, DnnError>>()?
    };

    log::debug!("Read {} tensors from {}", tensors.len(), path.display());

    Ok(tensors)
}

/// Drop the first `n` characters of every tensor name.
///
/// # Arguments
///
/// * `tensors` - The named tensors.
/// * `n` - The number of characters to drop.
///
/// # Errors
///
/// [`DnnError::InvalidCheckpointKey`] if a name has no characters left after
/// the prefix, or if two names collide once stripped.
pub fn strip_key_prefix(
    tensors: Vec<(String, Tensor)>,
    n: usize,
) -> Result<HashMap<String, Tensor>, DnnError> {
    let mut stripped = HashMap::with_capacity(tensors.len());
    for (key, tensor) in tensors {
        let offset = key.char_indices().nth(n).map(|(offset, _)| offset);
        let name = match offset {
            Some(offset) => key[offset..].to_string(),
            None => return Err(DnnError::InvalidCheckpointKey(key)),
        };
        if stripped.insert(name, tensor).is_some() {
            return Err(DnnError::InvalidCheckpointKey(key));
        }
    }
    Ok(stripped)
}
