//! Error type shared by configuration, data, checkpoint and training code.
//!
//! Math kernels treat shape violations as programming errors and panic;
//! everything that depends on user input or the filesystem returns
//! [`VitError`] instead.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, VitError>;

/// Errors surfaced by the public API
#[derive(Debug, Error)]
pub enum VitError {
    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config or metadata JSON could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Model or training hyperparameters are inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Images and labels do not describe a usable dataset
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    /// Checkpoint bytes are malformed
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// Checkpoint was written for a different architecture
    #[error("Checkpoint config does not match the model config")]
    ConfigMismatch,

    /// Checkpoint lacks a tensor the model owns
    #[error("Checkpoint is missing parameter '{0}'")]
    MissingParameter(String),

    /// Checkpoint tensor has the wrong shape for the model
    #[error("Shape mismatch for '{name}': expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Parameter name
        name: String,
        /// Shape owned by the model
        expected: Vec<usize>,
        /// Shape stored in the checkpoint
        found: Vec<usize>,
    },

    /// Training finished without ever writing a best-weights checkpoint
    #[error("No checkpoint was written to {0}")]
    NoCheckpoint(String),
}
