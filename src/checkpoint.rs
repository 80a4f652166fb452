//! Best-Weights Checkpoints
//!
//! Saves and restores every model parameter by name, together with the model
//! config that produced them and a little training metadata.
//!
//! ## File Format (little-endian)
//!
//! ```text
//! "VITRAILCKP"                 10-byte magic
//! u8 version                   currently 1
//! u32 len, [u8] config JSON    ModelConfig
//! u32 len, [u8] metadata JSON  CheckpointMetadata
//! u32 tensor count
//! per tensor:
//!   u32 len, [u8] name         dotted parameter name
//!   u32 ndim, u32 × ndim dims
//!   u32 len, f32 × len values
//! ```
//!
//! Only weights are stored; optimizer moments are not part of a checkpoint.
//!
//! ## Atomic Replacement
//!
//! A save writes `<path>.tmp` and renames it over `path`, so a crash mid-write
//! never leaves a half-written checkpoint where the previous best used to be.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vitrail::checkpoint::{load_weights, save_weights, CheckpointMetadata};
//! use vitrail::{ModelConfig, TrainableViT};
//!
//! let mut model = TrainableViT::new(&ModelConfig::tiny(3))?;
//! let meta = CheckpointMetadata { epoch: 1, val_accuracy: 0.5, val_loss: 1.0 };
//! save_weights(&model, &meta, "/tmp/checkpoint")?;
//! let restored = load_weights(&mut model, "/tmp/checkpoint")?;
//! assert_eq!(restored.epoch, 1);
//! # Ok::<(), vitrail::VitError>(())
//! ```

use crate::config::ModelConfig;
use crate::error::{Result, VitError};
use crate::params::Parameters;
use crate::tensor::Tensor;
use crate::vit::TrainableViT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const MAGIC: &[u8; 10] = b"VITRAILCKP";
const VERSION: u8 = 1;

/// Upper bound for JSON sections and names, to reject garbage lengths early
const MAX_SECTION_BYTES: usize = 16 * 1024 * 1024;

/// Upper bound on tensor rank
const MAX_TENSOR_DIMS: usize = 8;

/// Training state recorded alongside the weights
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// 1-based epoch that produced the weights
    pub epoch: usize,
    pub val_accuracy: f32,
    pub val_loss: f32,
}

/// A checkpoint file read into memory
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub config: ModelConfig,
    pub metadata: CheckpointMetadata,
    pub tensors: Vec<(String, Tensor)>,
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_u32(w: &mut impl Write, value: usize) -> Result<()> {
    let value = u32::try_from(value)
        .map_err(|_| VitError::InvalidCheckpoint(format!("{value} does not fit in u32")))?;
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_bytes(w: &mut impl Write, bytes: &[u8]) -> Result<()> {
    write_u32(w, bytes.len())?;
    w.write_all(bytes)?;
    Ok(())
}

fn write_tensor(w: &mut impl Write, name: &str, tensor: &Tensor) -> Result<()> {
    write_bytes(w, name.as_bytes())?;
    write_u32(w, tensor.shape.len())?;
    for &dim in &tensor.shape {
        write_u32(w, dim)?;
    }
    write_u32(w, tensor.data.len())?;
    for &val in &tensor.data {
        w.write_all(&val.to_le_bytes())?;
    }
    Ok(())
}

/// Save model weights and metadata to `path`, replacing any previous file
pub fn save_weights(
    model: &TrainableViT,
    metadata: &CheckpointMetadata,
    path: impl AsRef<Path>,
) -> Result<()> {
    let path = path.as_ref();
    let tmp = tmp_path(path);
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        w.write_all(MAGIC)?;
        w.write_all(&[VERSION])?;
        write_bytes(&mut w, serde_json::to_string(model.config())?.as_bytes())?;
        write_bytes(&mut w, serde_json::to_string(metadata)?.as_bytes())?;

        let tensors = model.named_tensors();
        write_u32(&mut w, tensors.len())?;
        for (name, tensor) in tensors {
            write_tensor(&mut w, &name, tensor)?;
        }
        w.flush()?;
    }
    fs::rename(&tmp, path)?;

    info!(
        path = %path.display(),
        epoch = metadata.epoch,
        val_accuracy = metadata.val_accuracy,
        "saved checkpoint"
    );
    Ok(())
}

/// Map a premature end of file to a checkpoint error
fn truncated(err: std::io::Error) -> VitError {
    if err.kind() == ErrorKind::UnexpectedEof {
        VitError::InvalidCheckpoint("file is truncated".to_string())
    } else {
        VitError::Io(err)
    }
}

fn read_u32(r: &mut impl Read) -> Result<usize> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(u32::from_le_bytes(buf) as usize)
}

fn read_bytes(r: &mut impl Read) -> Result<Vec<u8>> {
    let len = read_u32(r)?;
    if len > MAX_SECTION_BYTES {
        return Err(VitError::InvalidCheckpoint(format!(
            "section length {len} is implausibly large"
        )));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

fn read_tensor(r: &mut impl Read) -> Result<(String, Tensor)> {
    let name = String::from_utf8(read_bytes(r)?)
        .map_err(|_| VitError::InvalidCheckpoint("tensor name is not UTF-8".to_string()))?;

    let ndim = read_u32(r)?;
    if ndim > MAX_TENSOR_DIMS {
        return Err(VitError::InvalidCheckpoint(format!(
            "tensor '{name}' has {ndim} dimensions"
        )));
    }
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        shape.push(read_u32(r)?);
    }
    let len = read_u32(r)?;
    let numel = shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| {
            VitError::InvalidCheckpoint(format!("tensor '{name}' shape {shape:?} overflows"))
        })?;
    if numel != len {
        return Err(VitError::InvalidCheckpoint(format!(
            "tensor '{name}' has {len} values for shape {shape:?}"
        )));
    }

    // Grow with the bytes actually present rather than trusting the header
    let byte_len = len.checked_mul(4).ok_or_else(|| {
        VitError::InvalidCheckpoint(format!("tensor '{name}' is too large"))
    })?;
    let mut bytes = Vec::new();
    r.by_ref().take(byte_len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != byte_len {
        return Err(VitError::InvalidCheckpoint("file is truncated".to_string()));
    }
    let data = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((name, Tensor::new(data, shape)))
}

/// Read and structurally validate a checkpoint file
pub fn read_checkpoint(path: impl AsRef<Path>) -> Result<Checkpoint> {
    let mut r = BufReader::new(File::open(path.as_ref())?);

    let mut magic = [0u8; 10];
    r.read_exact(&mut magic).map_err(truncated)?;
    if &magic != MAGIC {
        return Err(VitError::InvalidCheckpoint(
            "bad magic, not a vitrail checkpoint".to_string(),
        ));
    }
    let mut version = [0u8; 1];
    r.read_exact(&mut version).map_err(truncated)?;
    if version[0] != VERSION {
        return Err(VitError::InvalidCheckpoint(format!(
            "unsupported version {}",
            version[0]
        )));
    }

    let config: ModelConfig = serde_json::from_slice(&read_bytes(&mut r)?)?;
    let metadata: CheckpointMetadata = serde_json::from_slice(&read_bytes(&mut r)?)?;

    let count = read_u32(&mut r)?;
    let mut tensors = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        tensors.push(read_tensor(&mut r)?);
    }

    Ok(Checkpoint {
        config,
        metadata,
        tensors,
    })
}

/// Restore weights from `path` into an existing model
///
/// # Errors
///
/// - [`VitError::ConfigMismatch`] if the file was written for another config
/// - [`VitError::MissingParameter`] / [`VitError::ShapeMismatch`] if the
///   tensors do not cover the model exactly
/// - [`VitError::InvalidCheckpoint`] for malformed files or extra tensors
///
/// The model is left untouched on error.
pub fn load_weights(model: &mut TrainableViT, path: impl AsRef<Path>) -> Result<CheckpointMetadata> {
    let path = path.as_ref();
    let checkpoint = read_checkpoint(path)?;
    if &checkpoint.config != model.config() {
        return Err(VitError::ConfigMismatch);
    }

    let expected = model.named_tensors().len();
    if checkpoint.tensors.len() != expected {
        return Err(VitError::InvalidCheckpoint(format!(
            "expected {expected} tensors, found {}",
            checkpoint.tensors.len()
        )));
    }

    let mut stored: HashMap<String, Tensor> = checkpoint.tensors.into_iter().collect();

    // Validate everything before mutating the model
    for (name, tensor) in model.named_tensors() {
        let found = stored
            .get(&name)
            .ok_or_else(|| VitError::MissingParameter(name.clone()))?;
        if found.shape != tensor.shape {
            return Err(VitError::ShapeMismatch {
                name,
                expected: tensor.shape.clone(),
                found: found.shape.clone(),
            });
        }
    }

    for (name, tensor) in model.named_tensors_mut() {
        if let Some(loaded) = stored.remove(&name) {
            *tensor = loaded;
        }
    }

    info!(
        path = %path.display(),
        epoch = checkpoint.metadata.epoch,
        val_accuracy = checkpoint.metadata.val_accuracy,
        "loaded checkpoint"
    );
    Ok(checkpoint.metadata)
}

/// Build a model from the config stored in a checkpoint and load its weights
pub fn load_model(path: impl AsRef<Path>) -> Result<(TrainableViT, CheckpointMetadata)> {
    let path = path.as_ref();
    let config = read_checkpoint(path)?.config;
    let mut model = TrainableViT::new(&config)?;
    let metadata = load_weights(&mut model, path)?;
    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta() -> CheckpointMetadata {
        CheckpointMetadata {
            epoch: 3,
            val_accuracy: 0.625,
            val_loss: 0.9,
        }
    }

    #[test]
    fn test_roundtrip_restores_identical_weights() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt");

        let original = TrainableViT::new(&ModelConfig::tiny(3)).unwrap();
        save_weights(&original, &meta(), &path).unwrap();
        assert!(!tmp_path(&path).exists());

        let mut config = ModelConfig::tiny(3);
        config.seed = 7;
        let mut other = TrainableViT::new(&config).unwrap();
        // The seed is part of the compatibility check, so align it before loading
        other.config.seed = 42;

        let restored = load_weights(&mut other, &path).unwrap();
        assert_eq!(restored, meta());
        for ((na, ta), (nb, tb)) in original.named_tensors().into_iter().zip(other.named_tensors()) {
            assert_eq!(na, nb);
            assert_eq!(ta.data, tb.data);
        }
    }

    #[test]
    fn test_load_model_uses_stored_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt");
        let mut config = ModelConfig::tiny(4);
        config.transformer_layers = 1;
        let model = TrainableViT::new(&config).unwrap();
        save_weights(&model, &meta(), &path).unwrap();

        let (loaded, metadata) = load_model(&path).unwrap();
        assert_eq!(loaded.config(), &config);
        assert_eq!(metadata.epoch, 3);
        assert_eq!(loaded.num_parameters(), model.num_parameters());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage");
        fs::write(&path, b"NOTACHECKPOINT-----").unwrap();
        let err = read_checkpoint(&path).unwrap_err();
        assert!(matches!(err, VitError::InvalidCheckpoint(_)));
    }

    #[test]
    fn test_rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt");
        let model = TrainableViT::new(&ModelConfig::tiny(3)).unwrap();
        save_weights(&model, &meta(), &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        let err = read_checkpoint(&path).unwrap_err();
        assert!(matches!(err, VitError::InvalidCheckpoint(msg) if msg.contains("truncated")));
    }

    #[test]
    fn test_rejects_mismatched_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt");
        let model = TrainableViT::new(&ModelConfig::tiny(3)).unwrap();
        save_weights(&model, &meta(), &path).unwrap();

        let mut other = TrainableViT::new(&ModelConfig::tiny(5)).unwrap();
        let before = other.named_tensors()[0].1.clone();
        let err = load_weights(&mut other, &path).unwrap_err();
        assert!(matches!(err, VitError::ConfigMismatch));
        assert_eq!(other.named_tensors()[0].1, &before);
    }

    /// Valid header and config, followed by one hand-written tensor header
    fn file_with_tensor_header(dims: &[u32], len: u32) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.push(VERSION);
        for section in [
            serde_json::to_vec(&ModelConfig::tiny(3)).unwrap(),
            serde_json::to_vec(&meta()).unwrap(),
        ] {
            bytes.extend((section.len() as u32).to_le_bytes());
            bytes.extend(section);
        }
        bytes.extend(1u32.to_le_bytes());
        bytes.extend(1u32.to_le_bytes());
        bytes.push(b'w');
        bytes.extend((dims.len() as u32).to_le_bytes());
        for d in dims {
            bytes.extend(d.to_le_bytes());
        }
        bytes.extend(len.to_le_bytes());
        bytes
    }

    #[test]
    fn test_rejects_overflowing_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt");
        fs::write(&path, file_with_tensor_header(&[u32::MAX, u32::MAX, u32::MAX], 1)).unwrap();
        let err = read_checkpoint(&path).unwrap_err();
        assert!(matches!(err, VitError::InvalidCheckpoint(msg) if msg.contains("overflows")));
    }

    #[test]
    fn test_huge_declared_tensor_without_data_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt");
        // Claims ~16 GiB of values but carries none
        fs::write(&path, file_with_tensor_header(&[65536, 65535], 65536 * 65535)).unwrap();
        let err = read_checkpoint(&path).unwrap_err();
        assert!(matches!(err, VitError::InvalidCheckpoint(msg) if msg.contains("truncated")));
    }

    #[test]
    fn test_rejects_absurd_rank() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt");
        fs::write(&path, file_with_tensor_header(&[1; 9], 1)).unwrap();
        let err = read_checkpoint(&path).unwrap_err();
        assert!(matches!(err, VitError::InvalidCheckpoint(msg) if msg.contains("dimensions")));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let err = read_checkpoint(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, VitError::Io(_)));
    }
}
