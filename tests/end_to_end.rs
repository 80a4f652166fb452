//! Train a tiny model through the public API and reload its checkpoint

use tempfile::tempdir;
use vitrail::{
    load_model, run_experiment, ImageDataset, ModelConfig, Parameters, SyntheticSpec, Tensor,
    TrainableViT, TrainingConfig,
};

fn synthetic(num_samples: usize) -> (ImageDataset, ImageDataset) {
    let all = ImageDataset::synthetic(&SyntheticSpec {
        num_samples,
        num_classes: 3,
        image_size: 8,
        channels: 1,
        noise_std: 0.1,
        seed: 21,
    })
    .unwrap();
    let split = num_samples * 3 / 4;
    let train: Vec<usize> = (0..split).collect();
    let test: Vec<usize> = (split..num_samples).collect();
    (all.subset(&train), all.subset(&test))
}

#[test]
fn test_train_then_reload_best_checkpoint() {
    let dir = tempdir().unwrap();
    let checkpoint = dir.path().join("best.ckpt");
    let (train, test) = synthetic(80);

    let config = TrainingConfig {
        num_epochs: 4,
        batch_size: 10,
        checkpoint_path: checkpoint.to_string_lossy().into_owned(),
        ..TrainingConfig::tiny()
    };
    let mut model = TrainableViT::new(&ModelConfig::tiny(3)).unwrap();
    let history = run_experiment(&mut model, &train, &test, &config).unwrap();

    assert_eq!(history.epochs.len(), 4);
    assert_eq!(history.test.samples, test.len());
    assert!((0.0..=1.0).contains(&history.test.accuracy));
    assert!(history.test.top_k_accuracy >= history.test.accuracy);

    let saved = history
        .epochs
        .iter()
        .filter(|e| e.checkpoint_saved)
        .map(|e| e.epoch)
        .last();
    assert_eq!(saved, Some(history.best_epoch));

    // The trained model holds the best weights, so a fresh load must match it
    let (mut reloaded, metadata) = load_model(&checkpoint).unwrap();
    assert_eq!(metadata.epoch, history.best_epoch);
    assert_eq!(metadata.val_accuracy, history.best_val_accuracy);
    assert_eq!(reloaded.num_parameters(), model.num_parameters());

    let images = train.batch_images(&[0, 1, 2]);
    let a = model.predict(&images);
    let b = reloaded.predict(&images);
    assert_eq!(a.shape, vec![3, 3]);
    assert_eq!(a.data, b.data);
}

#[test]
fn test_predict_is_deterministic_in_eval_mode() {
    let mut model = TrainableViT::new(&ModelConfig::tiny(5)).unwrap();
    let images = Tensor::new((0..128).map(|i| (i as f32 * 0.37).sin()).collect(), vec![2, 8, 8, 1]);
    let first = model.predict(&images);
    let second = model.predict(&images);
    assert_eq!(first.data, second.data);
    assert!(first.data.iter().all(|v| v.is_finite()));
}
