//! Training Logger
//!
//! Writes one CSV row per epoch and mirrors a summary line to `tracing`.
//!
//! ## CSV Format
//!
//! - `epoch`: 1-based epoch number
//! - `elapsed_seconds`: Wall-clock time since training started
//! - `learning_rate`: Learning rate used for the epoch
//! - `train_loss`, `train_accuracy`: Running metrics over the epoch's batches
//! - `val_loss`, `val_accuracy`, `val_top_k_accuracy`: Held-out metrics
//! - `checkpoint_saved`: Whether the epoch produced a new best checkpoint
//!
//! ## Example
//!
//! ```rust,no_run
//! use vitrail::training_logger::TrainingLogger;
//! use vitrail::train::EpochRecord;
//!
//! let mut logger = TrainingLogger::new("training_log.csv")?;
//! # let record: EpochRecord = todo!();
//! logger.log(&record)?;
//! # Ok::<(), vitrail::VitError>(())
//! ```

use crate::error::Result;
use crate::train::EpochRecord;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

pub const CSV_HEADER: &str = "epoch,elapsed_seconds,learning_rate,train_loss,train_accuracy,val_loss,val_accuracy,val_top_k_accuracy,checkpoint_saved";

/// Per-epoch CSV logger
pub struct TrainingLogger {
    log_file: BufWriter<File>,
}

impl TrainingLogger {
    /// Create the CSV file (truncating any existing one) and write the header
    pub fn new(log_path: impl AsRef<Path>) -> Result<Self> {
        let mut log_file = BufWriter::new(File::create(log_path)?);
        writeln!(log_file, "{CSV_HEADER}")?;
        log_file.flush()?;
        Ok(Self { log_file })
    }

    /// Append one epoch
    pub fn log(&mut self, record: &EpochRecord) -> Result<()> {
        writeln!(
            self.log_file,
            "{},{:.2},{:.6},{:.4},{:.4},{:.4},{:.4},{:.4},{}",
            record.epoch,
            record.elapsed_seconds,
            record.learning_rate,
            record.train.loss,
            record.train.accuracy,
            record.val.loss,
            record.val.accuracy,
            record.val.top_k_accuracy,
            record.checkpoint_saved
        )?;
        // Flush per row so a crashed run keeps its history
        self.log_file.flush()?;
        Ok(())
    }
}

/// One-line console summary of an epoch
pub fn log_epoch_summary(record: &EpochRecord) {
    info!(
        epoch = record.epoch,
        elapsed = format!("{:.1}s", record.elapsed_seconds),
        train_loss = format!("{:.4}", record.train.loss),
        train_accuracy = format!("{:.4}", record.train.accuracy),
        val_loss = format!("{:.4}", record.val.loss),
        val_accuracy = format!("{:.4}", record.val.accuracy),
        val_top_k_accuracy = format!("{:.4}", record.val.top_k_accuracy),
        checkpoint_saved = record.checkpoint_saved,
        "epoch complete"
    );
}
