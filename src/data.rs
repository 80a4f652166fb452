//! Image Datasets
//!
//! An in-memory set of equally sized images with integer class labels, plus
//! the batching and splitting the training loop needs.
//!
//! ## Layout
//!
//! Images are stored back to back in one flat `Vec<f32>`, each in
//! `[height, width, channels]` row-major order:
//!
//! ```text
//! images: [img0 (H·W·C values)][img1][img2]...
//! labels: [y0, y1, y2, ...]
//! ```
//!
//! ## Validation Split
//!
//! [`ImageDataset::split_validation`] holds out the **last** fraction of the
//! samples, before any shuffling, so the validation set is fixed for the
//! whole run:
//!
//! ```text
//! fraction = 0.1, 100 samples → train = 0..90, val = 90..100
//! ```
//!
//! ## Synthetic Data
//!
//! [`ImageDataset::synthetic`] draws one random prototype image per class and
//! emits noisy copies of it. A model that learns anything at all separates
//! the classes, which makes it a convenient stand-in for a real dataset in
//! smoke runs and tests.
//!
//! ## Example
//!
//! ```rust
//! use vitrail::data::{ImageDataset, SyntheticSpec};
//!
//! let data = ImageDataset::synthetic(&SyntheticSpec {
//!     num_samples: 20,
//!     num_classes: 4,
//!     image_size: 8,
//!     channels: 1,
//!     noise_std: 0.1,
//!     seed: 0,
//! })?;
//! let (train, val) = data.split_validation(0.1);
//! assert_eq!((train.len(), val.len()), (18, 2));
//! # Ok::<(), vitrail::VitError>(())
//! ```

use crate::error::{Result, VitError};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Images with class labels, all of one shape
#[derive(Clone, Debug, PartialEq)]
pub struct ImageDataset {
    images: Vec<f32>,
    labels: Vec<usize>,
    height: usize,
    width: usize,
    channels: usize,
}

impl ImageDataset {
    /// Wrap flat image data and labels
    ///
    /// # Errors
    ///
    /// [`VitError::InvalidDataset`] if any dimension is zero or the data
    /// length is not `labels.len() × height × width × channels`.
    pub fn new(
        images: Vec<f32>,
        labels: Vec<usize>,
        height: usize,
        width: usize,
        channels: usize,
    ) -> Result<Self> {
        if height == 0 || width == 0 || channels == 0 {
            return Err(VitError::InvalidDataset(format!(
                "image dimensions must be positive, got {height}x{width}x{channels}"
            )));
        }
        let per_image = height * width * channels;
        if images.len() != labels.len() * per_image {
            return Err(VitError::InvalidDataset(format!(
                "{} values do not hold {} images of {height}x{width}x{channels}",
                images.len(),
                labels.len()
            )));
        }
        Ok(Self {
            images,
            labels,
            height,
            width,
            channels,
        })
    }

    /// Noisy copies of one random prototype per class
    pub fn synthetic(spec: &SyntheticSpec) -> Result<Self> {
        if spec.num_classes == 0 {
            return Err(VitError::InvalidDataset(
                "num_classes must be positive".to_string(),
            ));
        }
        let noise = Normal::new(0.0f32, spec.noise_std)
            .map_err(|e| VitError::InvalidDataset(format!("noise_std: {e}")))?;
        let mut rng = StdRng::seed_from_u64(spec.seed);

        let per_image = spec.image_size * spec.image_size * spec.channels;
        let prototypes: Vec<Vec<f32>> = (0..spec.num_classes)
            .map(|_| (0..per_image).map(|_| rng.random_range(0.0..1.0)).collect())
            .collect();

        let mut images = Vec::with_capacity(spec.num_samples * per_image);
        let mut labels = Vec::with_capacity(spec.num_samples);
        for _ in 0..spec.num_samples {
            let label = rng.random_range(0..spec.num_classes);
            images.extend(
                prototypes[label]
                    .iter()
                    .map(|&p| p + noise.sample(&mut rng)),
            );
            labels.push(label);
        }

        Self::new(images, labels, spec.image_size, spec.image_size, spec.channels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `(height, width, channels)`
    pub fn image_shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    fn per_image(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// Image `index` as `[height, width, channels]`
    pub fn image(&self, index: usize) -> Tensor {
        let n = self.per_image();
        Tensor::new(
            self.images[index * n..(index + 1) * n].to_vec(),
            vec![self.height, self.width, self.channels],
        )
    }

    pub fn label(&self, index: usize) -> usize {
        self.labels[index]
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// The selected images stacked as `[indices.len(), H, W, C]`
    pub fn batch_images(&self, indices: &[usize]) -> Tensor {
        let n = self.per_image();
        let mut data = Vec::with_capacity(indices.len() * n);
        for &i in indices {
            data.extend_from_slice(&self.images[i * n..(i + 1) * n]);
        }
        Tensor::new(
            data,
            vec![indices.len(), self.height, self.width, self.channels],
        )
    }

    /// New dataset holding the selected samples, in the given order
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            images: self.batch_images(indices).data,
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            height: self.height,
            width: self.width,
            channels: self.channels,
        }
    }

    /// Split off the last `fraction` of samples as a validation set
    ///
    /// Returns `(train, validation)`; the split point is
    /// `⌊len × (1 − fraction)⌋`.
    pub fn split_validation(&self, fraction: f32) -> (Self, Self) {
        let split = ((self.len() as f32) * (1.0 - fraction)) as usize;
        let split = split.min(self.len());
        let train: Vec<usize> = (0..split).collect();
        let val: Vec<usize> = (split..self.len()).collect();
        (self.subset(&train), self.subset(&val))
    }

    /// Check every label is below `num_classes`
    pub fn check_labels(&self, num_classes: usize) -> Result<()> {
        match self.labels.iter().position(|&l| l >= num_classes) {
            Some(i) => Err(VitError::InvalidDataset(format!(
                "label {} at index {i} is out of range for {num_classes} classes",
                self.labels[i]
            ))),
            None => Ok(()),
        }
    }

    /// Check the image geometry matches `(height, width, channels)`
    pub fn check_shape(&self, height: usize, width: usize, channels: usize) -> Result<()> {
        if self.image_shape() != (height, width, channels) {
            return Err(VitError::InvalidDataset(format!(
                "images are {}x{}x{}, model expects {height}x{width}x{channels}",
                self.height, self.width, self.channels
            )));
        }
        Ok(())
    }
}

/// Parameters for [`ImageDataset::synthetic`]
#[derive(Clone, Debug)]
pub struct SyntheticSpec {
    pub num_samples: usize,
    pub num_classes: usize,
    /// Square image side
    pub image_size: usize,
    pub channels: usize,
    /// Standard deviation of the per-pixel Gaussian noise
    pub noise_std: f32,
    pub seed: u64,
}

/// Sample indices `0..len` shuffled with `rng` and cut into batches
///
/// The final batch keeps whatever is left over.
pub fn shuffled_batches(len: usize, batch_size: usize, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    indices.chunks(batch_size).map(<[usize]>::to_vec).collect()
}

/// Sample indices `0..len` in order, cut into batches
pub fn sequential_batches(len: usize, batch_size: usize) -> Vec<Vec<usize>> {
    (0..len)
        .collect::<Vec<_>>()
        .chunks(batch_size)
        .map(<[usize]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(num_samples: usize) -> SyntheticSpec {
        SyntheticSpec {
            num_samples,
            num_classes: 3,
            image_size: 4,
            channels: 2,
            noise_std: 0.05,
            seed: 11,
        }
    }

    #[test]
    fn test_new_rejects_inconsistent_lengths() {
        let err = ImageDataset::new(vec![0.0; 10], vec![0, 1], 2, 2, 1).unwrap_err();
        assert!(matches!(err, VitError::InvalidDataset(_)));
        assert!(ImageDataset::new(vec![0.0; 8], vec![0, 1], 2, 2, 1).is_ok());
    }

    #[test]
    fn test_image_and_batch_slicing() {
        let data = ImageDataset::new((0..12).map(|i| i as f32).collect(), vec![0, 1, 2], 2, 2, 1)
            .unwrap();
        assert_eq!(data.image(1).data, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(data.image(1).shape, vec![2, 2, 1]);

        let batch = data.batch_images(&[2, 0]);
        assert_eq!(batch.shape, vec![2, 2, 2, 1]);
        assert_eq!(&batch.data[..4], &[8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_split_takes_the_tail() {
        let data = ImageDataset::new((0..10).map(|i| i as f32).collect(), (0..10).collect(), 1, 1, 1)
            .unwrap();
        let (train, val) = data.split_validation(0.2);
        assert_eq!(train.labels(), &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(val.labels(), &[8, 9]);

        let (all, none) = data.split_validation(0.0);
        assert_eq!(all.len(), 10);
        assert!(none.is_empty());
    }

    #[test]
    fn test_synthetic_is_seeded_and_labelled() {
        let a = ImageDataset::synthetic(&spec(30)).unwrap();
        let b = ImageDataset::synthetic(&spec(30)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 30);
        assert_eq!(a.image_shape(), (4, 4, 2));
        assert!(a.check_labels(3).is_ok());
        assert!(a.check_labels(1).is_err());
    }

    #[test]
    fn test_synthetic_samples_cluster_by_class() {
        let data = ImageDataset::synthetic(&spec(40)).unwrap();
        let first = (0..data.len()).find(|&i| data.label(i) == data.label(0) && i > 0);
        if let Some(j) = first {
            let a = data.image(0);
            let b = data.image(j);
            let dist: f32 = a.data.iter().zip(&b.data).map(|(x, y)| (x - y).abs()).sum();
            // Same prototype, only noise apart
            assert!(dist / (a.numel() as f32) < 0.3);
        }
    }

    #[test]
    fn test_batches_cover_every_index_once() {
        let mut rng = StdRng::seed_from_u64(3);
        let batches = shuffled_batches(10, 4, &mut rng);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        let mut all: Vec<usize> = batches.concat();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());

        assert_eq!(sequential_batches(5, 2), vec![vec![0, 1], vec![2, 3], vec![4]]);
    }
}
