//! ViT Training with Experiment Presets
//!
//! Train a Vision Transformer on a seeded synthetic dataset using a named
//! preset, a JSON experiment file, or either one with command-line
//! overrides.
//!
//! ## Usage
//!
//! ```bash
//! # List available presets
//! cargo run --release --bin vitrail-train -- --list-presets
//!
//! # Quick smoke run
//! cargo run --release --bin vitrail-train -- --preset tiny
//!
//! # Reference architecture, shorter run
//! cargo run --release --bin vitrail-train -- --preset paper --epochs 5 --train-samples 2000
//!
//! # JSON experiment file with overrides
//! cargo run --release --bin vitrail-train -- --config experiment.json --lr 0.0005
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`); `RUST_LOG=debug` adds
//! per-batch loss and gradient norms.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vitrail::{
    run_experiment, ExperimentConfig, ImageDataset, ModelConfig, SyntheticSpec, TrainableViT,
    TrainingConfig,
};

#[derive(Parser)]
#[command(
    name = "vitrail-train",
    about = "Train a Vision Transformer classifier on synthetic images"
)]
struct Args {
    /// Named preset (see --list-presets)
    #[arg(long)]
    preset: Option<String>,

    /// List available presets and exit
    #[arg(long)]
    list_presets: bool,

    /// JSON experiment file with `model` and `training` sections
    #[arg(long, conflicts_with = "preset")]
    config: Option<String>,

    // Training parameters
    /// Number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Images per optimizer step
    #[arg(long)]
    batch_size: Option<usize>,

    /// AdamW learning rate
    #[arg(long)]
    lr: Option<f32>,

    /// Decoupled weight decay
    #[arg(long)]
    weight_decay: Option<f32>,

    /// Gradient clipping max norm (off unless set)
    #[arg(long)]
    grad_clip: Option<f32>,

    // Data and outputs
    /// Synthetic training images (validation is carved from these)
    #[arg(long)]
    train_samples: Option<usize>,

    /// Synthetic test images
    #[arg(long)]
    test_samples: Option<usize>,

    /// Number of classes
    #[arg(long)]
    classes: Option<usize>,

    /// Per-pixel noise around each class prototype
    #[arg(long, default_value = "0.3")]
    noise: f32,

    /// Seed for weights, shuffling and the synthetic data
    #[arg(long)]
    seed: Option<u64>,

    /// Where the best weights are written
    #[arg(long)]
    checkpoint: Option<String>,

    /// Per-epoch CSV log
    #[arg(long)]
    log: Option<String>,

    /// Write the training history as JSON
    #[arg(long)]
    history: Option<String>,
}

struct Preset {
    name: &'static str,
    model: fn(usize) -> ModelConfig,
    training: fn() -> TrainingConfig,
    classes: usize,
    train_samples: usize,
    test_samples: usize,
    description: &'static str,
}

const PRESETS: &[Preset] = &[
    Preset {
        name: "paper",
        model: ModelConfig::paper,
        training: TrainingConfig::default,
        classes: 100,
        train_samples: 50000,
        test_samples: 10000,
        description: "84x84x4 inputs, 6x6 patches, 8 blocks, 100 epochs",
    },
    Preset {
        name: "tiny",
        model: ModelConfig::tiny,
        training: TrainingConfig::tiny,
        classes: 4,
        train_samples: 200,
        test_samples: 50,
        description: "8x8x1 inputs, 4x4 patches, 2 blocks, finishes in seconds",
    },
];

fn print_presets() {
    println!("\nAvailable presets:\n");
    println!(
        "  {:<8} {:>7} {:>6} {:>6} {:>7} {:>6}   DESCRIPTION",
        "NAME", "CLASSES", "TRAIN", "TEST", "EPOCHS", "BATCH"
    );
    println!("  {}", "-".repeat(90));
    for p in PRESETS {
        let training = (p.training)();
        println!(
            "  {:<8} {:>7} {:>6} {:>6} {:>7} {:>6}   {}",
            p.name,
            p.classes,
            p.train_samples,
            p.test_samples,
            training.num_epochs,
            training.batch_size,
            p.description
        );
    }
    println!("\nUsage: vitrail-train --preset <NAME>");
    println!("Override any parameter: --preset tiny --epochs 10 --lr 0.0005");
}

fn find_preset(name: &str) -> Result<&'static Preset> {
    PRESETS.iter().find(|p| p.name == name).ok_or_else(|| {
        anyhow!("Unknown preset '{name}'. Use --list-presets to see available options.")
    })
}

/// Resolve the experiment from the preset or config file, then apply overrides
fn resolve(args: &Args) -> Result<(ExperimentConfig, usize, usize)> {
    let (mut experiment, mut train_samples, mut test_samples) = match &args.config {
        Some(path) => {
            let experiment = ExperimentConfig::from_json_file(path)
                .with_context(|| format!("failed to load experiment config {path}"))?;
            let tiny = find_preset("tiny")?;
            (experiment, tiny.train_samples, tiny.test_samples)
        }
        None => {
            let preset = find_preset(args.preset.as_deref().unwrap_or("tiny"))?;
            let experiment = ExperimentConfig {
                model: (preset.model)(preset.classes),
                training: (preset.training)(),
            };
            (experiment, preset.train_samples, preset.test_samples)
        }
    };

    let training = &mut experiment.training;
    if let Some(epochs) = args.epochs {
        training.num_epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        training.batch_size = batch_size;
    }
    if let Some(lr) = args.lr {
        training.learning_rate = lr;
    }
    if let Some(weight_decay) = args.weight_decay {
        training.weight_decay = weight_decay;
    }
    if args.grad_clip.is_some() {
        training.grad_clip = args.grad_clip;
    }
    if let Some(path) = &args.checkpoint {
        training.checkpoint_path = path.clone();
    }
    if args.log.is_some() {
        training.log_path = args.log.clone();
    }
    if let Some(seed) = args.seed {
        training.seed = seed;
        experiment.model.seed = seed;
    }
    if let Some(classes) = args.classes {
        experiment.model.num_classes = classes;
    }
    if let Some(n) = args.train_samples {
        train_samples = n;
    }
    if let Some(n) = args.test_samples {
        test_samples = n;
    }

    experiment.model.validate().context("invalid model configuration")?;
    experiment
        .training
        .validate()
        .context("invalid training configuration")?;
    Ok((experiment, train_samples, test_samples))
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    if args.list_presets {
        print_presets();
        return Ok(());
    }

    let (experiment, train_samples, test_samples) = resolve(&args)?;
    let model_config = &experiment.model;

    // Train and test share class prototypes, so draw them as one set
    let all = ImageDataset::synthetic(&SyntheticSpec {
        num_samples: train_samples + test_samples,
        num_classes: model_config.num_classes,
        image_size: model_config.image_size,
        channels: model_config.num_channels,
        noise_std: args.noise,
        seed: experiment.training.seed,
    })
    .context("failed to generate synthetic data")?;
    let train_indices: Vec<usize> = (0..train_samples).collect();
    let test_indices: Vec<usize> = (train_samples..all.len()).collect();
    let train = all.subset(&train_indices);
    let test = all.subset(&test_indices);
    info!(
        train = train.len(),
        test = test.len(),
        classes = model_config.num_classes,
        "generated synthetic dataset"
    );

    let mut model = TrainableViT::new(model_config).context("failed to build model")?;
    let history = run_experiment(&mut model, &train, &test, &experiment.training)
        .context("training failed")?;

    info!(
        best_epoch = history.best_epoch,
        best_val_accuracy = format!("{:.4}", history.best_val_accuracy),
        checkpoint = %experiment.training.checkpoint_path,
        "training complete"
    );

    if let Some(path) = &args.history {
        let json = serde_json::to_string_pretty(&history)?;
        std::fs::write(path, json).with_context(|| format!("failed to write history to {path}"))?;
        info!(path = %path, "wrote training history");
    }

    Ok(())
}
