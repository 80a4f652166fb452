//! Model and Training Configuration
//!
//! Two plain serde structs hold every hyperparameter:
//!
//! - [`ModelConfig`]: static architecture (image geometry, widths, depths,
//!   dropout rates). Stored inside checkpoints so weights can be matched to
//!   the architecture that produced them.
//! - [`TrainingConfig`]: optimizer, batching, validation and checkpoint
//!   settings for [`crate::train::run_experiment`].
//!
//! Both implement `Default` with the hyperparameters of the reference ViT
//! experiment, and [`ExperimentConfig`] bundles them for loading from JSON.
//!
//! ## Example
//!
//! ```rust
//! use vitrail::ModelConfig;
//!
//! let config = ModelConfig::default();
//! assert_eq!(config.num_patches(), 196); // (84 / 6)²
//! assert_eq!(config.patch_dim(), 6 * 6 * 4);
//! ```

use crate::error::{Result, VitError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Architecture hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Height and width of the (square) input image
    pub image_size: usize,
    /// Side length of each square patch
    pub patch_size: usize,
    /// Channels per pixel
    pub num_channels: usize,
    /// Embedding width used by every transformer block
    pub projection_dim: usize,
    /// Attention heads per block
    pub num_heads: usize,
    /// Feed-forward widths inside each block; the last must equal `projection_dim`
    pub transformer_units: Vec<usize>,
    /// Number of transformer blocks
    pub transformer_layers: usize,
    /// Hidden widths of the classifier MLP
    pub mlp_head_units: Vec<usize>,
    /// Output classes
    pub num_classes: usize,
    /// Dropout on attention weights
    pub attention_dropout: f32,
    /// Dropout after each feed-forward layer inside blocks
    pub mlp_dropout: f32,
    /// Dropout in the classification head
    pub head_dropout: f32,
    /// LayerNorm epsilon
    pub layer_norm_eps: f32,
    /// Base seed for weight initialization
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::paper(100)
    }
}

impl ModelConfig {
    /// Hyperparameters of the reference experiment
    ///
    /// 84×84×4 inputs cut into 6×6 patches (196 tokens), 64-wide embeddings,
    /// 4 heads, 8 blocks, and a 2048→1024 classifier head.
    pub fn paper(num_classes: usize) -> Self {
        let projection_dim = 64;
        Self {
            image_size: 84,
            patch_size: 6,
            num_channels: 4,
            projection_dim,
            num_heads: 4,
            transformer_units: vec![projection_dim * 2, projection_dim],
            transformer_layers: 8,
            mlp_head_units: vec![2048, 1024],
            num_classes,
            attention_dropout: 0.1,
            mlp_dropout: 0.1,
            head_dropout: 0.5,
            layer_norm_eps: 1e-6,
            seed: 42,
        }
    }

    /// A toy configuration for tests and quick smoke runs
    ///
    /// 8×8×1 images, 4×4 patches (4 tokens), 8-wide embeddings, 2 heads,
    /// 2 blocks. Trains in seconds on a laptop.
    pub fn tiny(num_classes: usize) -> Self {
        let projection_dim = 8;
        Self {
            image_size: 8,
            patch_size: 4,
            num_channels: 1,
            projection_dim,
            num_heads: 2,
            transformer_units: vec![projection_dim * 2, projection_dim],
            transformer_layers: 2,
            mlp_head_units: vec![16, 8],
            num_classes,
            attention_dropout: 0.1,
            mlp_dropout: 0.1,
            head_dropout: 0.5,
            layer_norm_eps: 1e-6,
            seed: 42,
        }
    }

    /// Same architecture with every dropout rate set to zero
    pub fn without_dropout(mut self) -> Self {
        self.attention_dropout = 0.0;
        self.mlp_dropout = 0.0;
        self.head_dropout = 0.0;
        self
    }

    /// Patches per image: `(image_size / patch_size)²`
    pub fn num_patches(&self) -> usize {
        let per_side = self.image_size / self.patch_size;
        per_side * per_side
    }

    /// Length of one flattened patch: `patch_size² × num_channels`
    pub fn patch_dim(&self) -> usize {
        self.patch_size * self.patch_size * self.num_channels
    }

    /// Width of the flattened representation fed to the head
    pub fn flattened_dim(&self) -> usize {
        self.num_patches() * self.projection_dim
    }

    /// Check the architecture is internally consistent
    ///
    /// Rejects zero sizes, an image size that the patch size does not
    /// divide, feed-forward units that do not return to `projection_dim`,
    /// and dropout rates outside `[0, 1)`.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("image_size", self.image_size),
            ("patch_size", self.patch_size),
            ("num_channels", self.num_channels),
            ("projection_dim", self.projection_dim),
            ("num_heads", self.num_heads),
            ("num_classes", self.num_classes),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(VitError::InvalidConfig(format!("{name} must be positive")));
            }
        }

        if self.image_size % self.patch_size != 0 {
            return Err(VitError::InvalidConfig(format!(
                "image_size {} is not divisible by patch_size {}",
                self.image_size, self.patch_size
            )));
        }

        match self.transformer_units.last() {
            Some(&last) if last == self.projection_dim => {}
            Some(&last) => {
                return Err(VitError::InvalidConfig(format!(
                    "last transformer unit ({last}) must equal projection_dim ({})",
                    self.projection_dim
                )))
            }
            None => {
                return Err(VitError::InvalidConfig(
                    "transformer_units must not be empty".to_string(),
                ))
            }
        }

        if self
            .transformer_units
            .iter()
            .chain(&self.mlp_head_units)
            .any(|&u| u == 0)
        {
            return Err(VitError::InvalidConfig(
                "hidden layer widths must be positive".to_string(),
            ));
        }

        for (name, rate) in [
            ("attention_dropout", self.attention_dropout),
            ("mlp_dropout", self.mlp_dropout),
            ("head_dropout", self.head_dropout),
        ] {
            if !(0.0..1.0).contains(&rate) {
                return Err(VitError::InvalidConfig(format!(
                    "{name} must be in [0, 1), got {rate}"
                )));
            }
        }

        if self.layer_norm_eps <= 0.0 {
            return Err(VitError::InvalidConfig(
                "layer_norm_eps must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Optimizer and training-loop hyperparameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// AdamW learning rate
    pub learning_rate: f32,
    /// Decoupled weight decay coefficient
    pub weight_decay: f32,
    /// First-moment decay
    pub beta1: f32,
    /// Second-moment decay
    pub beta2: f32,
    /// Adam epsilon
    pub epsilon: f32,
    /// Images per optimizer step
    pub batch_size: usize,
    /// Full passes over the training split
    pub num_epochs: usize,
    /// Fraction of the training arrays held out (from the end) for validation
    pub validation_split: f32,
    /// `k` for the top-k accuracy metric
    pub top_k: usize,
    /// Clip the global gradient norm to this value when set
    pub grad_clip: Option<f32>,
    /// Where the best weights are written
    pub checkpoint_path: String,
    /// Optional per-epoch CSV log
    pub log_path: Option<String>,
    /// Seed for the per-epoch shuffle
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            batch_size: 256,
            num_epochs: 100,
            validation_split: 0.1,
            top_k: 5,
            grad_clip: None,
            checkpoint_path: "/tmp/checkpoint".to_string(),
            log_path: None,
            seed: 1337,
        }
    }
}

impl TrainingConfig {
    /// Short run used by tests and the `tiny` CLI preset
    pub fn tiny() -> Self {
        Self {
            batch_size: 8,
            num_epochs: 3,
            ..Self::default()
        }
    }

    /// Reject values the training loop cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(VitError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(VitError::InvalidConfig("top_k must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(VitError::InvalidConfig(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(VitError::InvalidConfig(
                "learning_rate must be positive".to_string(),
            ));
        }
        if self.weight_decay < 0.0 {
            return Err(VitError::InvalidConfig(
                "weight_decay must not be negative".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err(VitError::InvalidConfig(
                "beta1 and beta2 must be in [0, 1)".to_string(),
            ));
        }
        if let Some(clip) = self.grad_clip {
            if !(clip > 0.0) {
                return Err(VitError::InvalidConfig(
                    "grad_clip must be positive when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Model + training configuration, as stored in a JSON experiment file
///
/// ```json
/// {
///   "model": { "image_size": 32, "patch_size": 4, "num_channels": 3 },
///   "training": { "num_epochs": 10, "batch_size": 64 }
/// }
/// ```
///
/// Omitted fields take their `Default` values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub model: ModelConfig,
    pub training: TrainingConfig,
}

impl ExperimentConfig {
    /// Parse from a JSON string and validate both halves
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ExperimentConfig = serde_json::from_str(json)?;
        config.model.validate()?;
        config.training.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON experiment file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_reference_experiment() {
        let config = ModelConfig::default();
        assert_eq!(config.num_patches(), 196);
        assert_eq!(config.flattened_dim(), 12544);
        assert_eq!(config.transformer_units, vec![128, 64]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_divisible_patch_size() {
        let mut config = ModelConfig::tiny(3);
        config.patch_size = 3;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, VitError::InvalidConfig(msg) if msg.contains("divisible")));
    }

    #[test]
    fn test_rejects_units_not_returning_to_projection_dim() {
        let mut config = ModelConfig::tiny(3);
        config.transformer_units = vec![16, 12];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_dropout() {
        let mut config = ModelConfig::tiny(3);
        config.head_dropout = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_training_validation() {
        assert!(TrainingConfig::default().validate().is_ok());
        let bad = TrainingConfig {
            validation_split: 1.5,
            ..TrainingConfig::default()
        };
        assert!(bad.validate().is_err());
        let bad = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_experiment_json_partial_fields_use_defaults() {
        let json = r#"{
            "model": { "image_size": 32, "patch_size": 4, "num_channels": 3, "num_classes": 10 },
            "training": { "num_epochs": 2 }
        }"#;
        let config = ExperimentConfig::from_json_str(json).unwrap();
        assert_eq!(config.model.num_patches(), 64);
        assert_eq!(config.model.projection_dim, 64);
        assert_eq!(config.training.num_epochs, 2);
        assert_eq!(config.training.batch_size, 256);
    }

    #[test]
    fn test_experiment_json_invalid_is_rejected() {
        let json = r#"{ "model": { "image_size": 30, "patch_size": 4 } }"#;
        assert!(ExperimentConfig::from_json_str(json).is_err());
    }
}
