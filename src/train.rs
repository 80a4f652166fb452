//! Training Loop
//!
//! Mini-batch AdamW training with best-weights checkpointing, followed by a
//! final test evaluation.
//!
//! ## One Epoch
//!
//! ```text
//! shuffle training indices (seeded)
//! for each batch:
//!     per image, in parallel:  forward → cross-entropy → backward
//!     sum gradients, divide by batch size
//!     (optional) clip global norm
//!     AdamW step
//! evaluate on the validation split
//! if val_accuracy > best so far: save checkpoint
//! ```
//!
//! ## After the Last Epoch
//!
//! The best checkpoint is loaded back into the model, so the returned model
//! and the test metrics both reflect the best validation epoch rather than
//! the last one.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vitrail::data::{ImageDataset, SyntheticSpec};
//! use vitrail::train::run_experiment;
//! use vitrail::{ModelConfig, TrainableViT, TrainingConfig};
//!
//! let spec = SyntheticSpec {
//!     num_samples: 200, num_classes: 4, image_size: 8, channels: 1,
//!     noise_std: 0.1, seed: 0,
//! };
//! let train = ImageDataset::synthetic(&spec)?;
//! let test = ImageDataset::synthetic(&SyntheticSpec { num_samples: 50, ..spec })?;
//!
//! let mut model = TrainableViT::new(&ModelConfig::tiny(4))?;
//! let history = run_experiment(&mut model, &train, &test, &TrainingConfig::tiny())?;
//! println!("test accuracy {:.2}%", history.test.accuracy * 100.0);
//! # Ok::<(), vitrail::VitError>(())
//! ```

use crate::checkpoint::{load_weights, save_weights, CheckpointMetadata};
use crate::config::TrainingConfig;
use crate::data::{sequential_batches, shuffled_batches, ImageDataset};
use crate::error::{Result, VitError};
use crate::gradients::{clip_gradients, compute_grad_norm};
use crate::metrics::{softmax_cross_entropy, EvalMetrics, MetricAccumulator};
use crate::optimizer::{adamw_update, AdamWOptimizer};
use crate::params::{accumulate, scale, Parameters};
use crate::tensor::Tensor;
use crate::training_logger::{log_epoch_summary, TrainingLogger};
use crate::vit::{TrainableViT, ViTGradients};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one optimizer step
#[derive(Clone, Copy, Debug)]
pub struct BatchMetrics {
    /// Loss and accuracy of the batch, measured before the update
    pub metrics: EvalMetrics,
    /// Global gradient norm before clipping
    pub grad_norm: f32,
}

/// Metrics for one epoch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub elapsed_seconds: f32,
    pub learning_rate: f32,
    pub train: EvalMetrics,
    pub val: EvalMetrics,
    pub checkpoint_saved: bool,
}

/// Everything `run_experiment` measured
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochRecord>,
    /// Epoch whose weights were restored for the test run
    pub best_epoch: usize,
    pub best_val_accuracy: f32,
    pub test: EvalMetrics,
}

/// Forward and backward one image; returns its gradients and loss
fn sample_gradients(model: &TrainableViT, image: &Tensor, label: usize) -> (ViTGradients, Tensor, f32) {
    let (logits, cache) = model.forward(image);
    let (loss, grad) = softmax_cross_entropy(&logits.data, label);
    let grad_logits = Tensor::new(grad, logits.shape.clone());
    (model.backward(&grad_logits, &cache), logits, loss)
}

/// One optimizer step on the samples at `indices`
///
/// Images are processed in parallel; each rayon worker folds its samples
/// into one gradient set before the sets are merged, so at most one set per
/// worker is alive at a time.
///
/// # Panics
///
/// Panics if `indices` is empty.
pub fn train_step(
    model: &mut TrainableViT,
    optimizer: &mut AdamWOptimizer,
    dataset: &ImageDataset,
    indices: &[usize],
    config: &TrainingConfig,
) -> BatchMetrics {
    assert!(!indices.is_empty(), "train_step needs at least one sample");
    model.set_training(true);
    let k = config.top_k;

    let frozen: &TrainableViT = model;
    let (mut grads, acc) = indices
        .par_iter()
        .fold(
            || None::<(ViTGradients, MetricAccumulator)>,
            |state, &i| {
                let label = dataset.label(i);
                let (grads, logits, loss) = sample_gradients(frozen, &dataset.image(i), label);
                let mut sample_acc = MetricAccumulator::new();
                sample_acc.record(&logits.data, label, loss, k);
                Some(match state {
                    None => (grads, sample_acc),
                    Some((mut total, acc)) => {
                        accumulate(&mut total, &grads);
                        (total, acc.merge(sample_acc))
                    }
                })
            },
        )
        .flatten()
        .reduce_with(|(mut a, acc_a), (b, acc_b)| {
            accumulate(&mut a, &b);
            (a, acc_a.merge(acc_b))
        })
        .expect("non-empty batch yields gradients");

    scale(&mut grads, 1.0 / indices.len() as f32);

    let grad_norm = match config.grad_clip {
        Some(max_norm) => clip_gradients(&mut grads, max_norm),
        None => compute_grad_norm(&grads),
    };

    adamw_update(
        model,
        &grads,
        optimizer,
        config.learning_rate,
        config.weight_decay,
    );

    let metrics = acc.finish();
    debug!(
        step = optimizer.step,
        loss = metrics.loss,
        accuracy = metrics.accuracy,
        grad_norm,
        "train step"
    );
    BatchMetrics { metrics, grad_norm }
}

/// Loss, accuracy and top-k accuracy over a whole dataset, in evaluation mode
///
/// Batches only bound how many images are in flight at once; results do not
/// depend on `batch_size`.
pub fn evaluate(
    model: &mut TrainableViT,
    dataset: &ImageDataset,
    batch_size: usize,
    top_k: usize,
) -> EvalMetrics {
    model.with_eval_mode(|model| {
        let mut total = MetricAccumulator::new();
        for batch in sequential_batches(dataset.len(), batch_size.max(1)) {
            let acc = batch
                .par_iter()
                .map(|&i| {
                    let label = dataset.label(i);
                    let (logits, _) = model.forward(&dataset.image(i));
                    let (loss, _) = softmax_cross_entropy(&logits.data, label);
                    let mut acc = MetricAccumulator::new();
                    acc.record(&logits.data, label, loss, top_k);
                    acc
                })
                .reduce(MetricAccumulator::new, MetricAccumulator::merge);
            total = total.merge(acc);
        }
        total.finish()
    })
}

/// Train, keep the best validation checkpoint, then report test metrics
///
/// # Arguments
///
/// * `model` - Model to train; holds the best weights on return
/// * `train` - Training data; its last `validation_split` fraction is held out
/// * `test` - Data for the final evaluation
/// * `config` - Optimizer, batching and checkpoint settings
///
/// # Errors
///
/// - [`VitError::InvalidConfig`] / [`VitError::InvalidDataset`] when the
///   inputs do not fit the model
/// - [`VitError::NoCheckpoint`] if no epoch ever produced a checkpoint
/// - I/O and checkpoint errors from saving or reloading weights
pub fn run_experiment(
    model: &mut TrainableViT,
    train: &ImageDataset,
    test: &ImageDataset,
    config: &TrainingConfig,
) -> Result<History> {
    config.validate()?;
    let model_config = model.config().clone();
    for dataset in [train, test] {
        dataset.check_shape(
            model_config.image_size,
            model_config.image_size,
            model_config.num_channels,
        )?;
        dataset.check_labels(model_config.num_classes)?;
    }

    let (train_split, val_split) = train.split_validation(config.validation_split);
    if train_split.is_empty() {
        return Err(VitError::InvalidDataset(
            "no training samples left after the validation split".to_string(),
        ));
    }
    if val_split.is_empty() {
        warn!("validation split is empty; selecting checkpoints by training accuracy");
    }

    info!(
        parameters = model.num_parameters(),
        train_samples = train_split.len(),
        val_samples = val_split.len(),
        test_samples = test.len(),
        epochs = config.num_epochs,
        batch_size = config.batch_size,
        "starting training"
    );

    let mut optimizer = AdamWOptimizer::from_config(&*model, config);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut logger = match &config.log_path {
        Some(path) => Some(TrainingLogger::new(path)?),
        None => None,
    };

    let start = Instant::now();
    let mut best_val_accuracy = f32::NEG_INFINITY;
    let mut best_epoch = 0;
    let mut epochs = Vec::with_capacity(config.num_epochs);

    for epoch in 1..=config.num_epochs {
        let mut running = RunningMetrics::default();
        for batch in shuffled_batches(train_split.len(), config.batch_size, &mut rng) {
            let step = train_step(model, &mut optimizer, &train_split, &batch, config);
            running.add(&step.metrics);
        }
        let train_metrics = running.finish();

        let val_metrics = if val_split.is_empty() {
            EvalMetrics::default()
        } else {
            evaluate(model, &val_split, config.batch_size, config.top_k)
        };
        let monitored = if val_split.is_empty() {
            train_metrics.accuracy
        } else {
            val_metrics.accuracy
        };

        let checkpoint_saved = monitored > best_val_accuracy;
        if checkpoint_saved {
            best_val_accuracy = monitored;
            best_epoch = epoch;
            let metadata = CheckpointMetadata {
                epoch,
                val_accuracy: monitored,
                val_loss: val_metrics.loss,
            };
            save_weights(model, &metadata, &config.checkpoint_path)?;
        }

        let record = EpochRecord {
            epoch,
            elapsed_seconds: start.elapsed().as_secs_f32(),
            learning_rate: config.learning_rate,
            train: train_metrics,
            val: val_metrics,
            checkpoint_saved,
        };
        log_epoch_summary(&record);
        if let Some(logger) = logger.as_mut() {
            logger.log(&record)?;
        }
        epochs.push(record);
    }

    if best_epoch == 0 {
        return Err(VitError::NoCheckpoint(config.checkpoint_path.clone()));
    }

    load_weights(model, &config.checkpoint_path)?;
    let test_metrics = evaluate(model, test, config.batch_size, config.top_k);
    info!("Test accuracy: {:.2}%", test_metrics.accuracy * 100.0);
    info!(
        "Test top {} accuracy: {:.2}%",
        config.top_k,
        test_metrics.top_k_accuracy * 100.0
    );

    Ok(History {
        epochs,
        best_epoch,
        best_val_accuracy,
        test: test_metrics,
    })
}

/// Sample-weighted running average of batch metrics
#[derive(Default)]
struct RunningMetrics {
    loss: f64,
    accuracy: f64,
    top_k_accuracy: f64,
    samples: usize,
}

impl RunningMetrics {
    fn add(&mut self, m: &EvalMetrics) {
        let n = m.samples as f64;
        self.loss += m.loss as f64 * n;
        self.accuracy += m.accuracy as f64 * n;
        self.top_k_accuracy += m.top_k_accuracy as f64 * n;
        self.samples += m.samples;
    }

    fn finish(&self) -> EvalMetrics {
        if self.samples == 0 {
            return EvalMetrics::default();
        }
        let n = self.samples as f64;
        EvalMetrics {
            loss: (self.loss / n) as f32,
            accuracy: (self.accuracy / n) as f32,
            top_k_accuracy: (self.top_k_accuracy / n) as f32,
            samples: self.samples,
        }
    }
}
