//! Vitrail: Vision Transformer Image Classification from Scratch
//!
//! A complete ViT classifier (patch extraction, patch encoding, pre-norm
//! transformer blocks, MLP head) with hand-written forward and backward
//! passes, an AdamW optimizer and a training driver that keeps the best
//! validation weights.
//!
//! # Modules
//!
//! - [`tensor`] - Row-major `f32` tensors and the math kernels
//! - [`layers`] - Patch extraction, patch encoder, attention, MLP, blocks
//! - [`vit`] - The full model and its gradients
//! - [`optimizer`] / [`gradients`] - AdamW and global-norm clipping
//! - [`data`] - In-memory image datasets, splits and batching
//! - [`train`] - `train_step`, `evaluate` and `run_experiment`
//! - [`checkpoint`] - Binary weight files
//! - [`config`] - Serde configuration for model and training
//!
//! # Example
//!
//! ```rust
//! use vitrail::{extract_patches, ModelConfig, Tensor, TrainableViT};
//!
//! let config = ModelConfig::tiny(3);
//! let image = Tensor::zeros(vec![8, 8, 1]);
//! assert_eq!(extract_patches(&image, 4).shape, vec![4, 16]);
//!
//! let mut model = TrainableViT::new(&config)?;
//! let batch = Tensor::zeros(vec![2, 8, 8, 1]);
//! assert_eq!(model.predict(&batch).shape, vec![2, 3]);
//! # Ok::<(), vitrail::VitError>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod gradients;
pub mod layers;
pub mod metrics;
pub mod optimizer;
pub mod params;
pub mod tensor;
pub mod train;
pub mod training_logger;
pub mod vit;

// Re-export main types for convenience
pub use checkpoint::{load_model, load_weights, save_weights};
pub use config::{ExperimentConfig, ModelConfig, TrainingConfig};
pub use data::{ImageDataset, SyntheticSpec};
pub use error::{Result, VitError};
pub use layers::{extract_patches, extract_patches_batch, PatchEncoder};
pub use metrics::EvalMetrics;
pub use params::Parameters;
pub use tensor::Tensor;
pub use train::{evaluate, run_experiment, train_step, History};
pub use vit::TrainableViT;
