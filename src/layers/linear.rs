//! Linear Layer (Dense)
//!
//! The affine map behind every projection in the ViT: patch projection,
//! Q/K/V and output projections, feed-forward layers and the classifier.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [rows, in_features]
//! Weight: W [in_features, out_features]
//! Bias:   b [out_features]
//! Output: y = x @ W + b [rows, out_features]
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! grad_W = x^T @ grad_y
//! grad_b = sum(grad_y, axis=0)
//! grad_x = grad_y @ W^T
//! ```
//!
//! ## Initialization
//!
//! Weights use Glorot (Xavier) uniform initialization,
//! `U(-√(6/(fan_in+fan_out)), +√(6/(fan_in+fan_out)))`, drawn from a seeded
//! `StdRng` so two models built from the same config are identical. Biases
//! start at zero.

use crate::params::Parameters;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draw `size` values uniformly from `(-limit, limit)` with a seeded RNG
pub fn uniform_init(size: usize, seed: u64, limit: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..size).map(|_| rng.random_range(-limit..limit)).collect()
}

/// Glorot-uniform weight matrix `[fan_in, fan_out]`
pub fn glorot_uniform(fan_in: usize, fan_out: usize, seed: u64) -> Tensor {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Tensor::new(
        uniform_init(fan_in * fan_out, seed, limit),
        vec![fan_in, fan_out],
    )
}

/// Fully connected layer computing `y = x @ W + b`
#[derive(Clone, Debug)]
pub struct TrainableLinear {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl TrainableLinear {
    /// Create a layer with Glorot-uniform weights and zero bias
    ///
    /// # Arguments
    ///
    /// * `in_features` - Input width
    /// * `out_features` - Output width
    /// * `seed` - Initialization seed
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        Self {
            weight: glorot_uniform(in_features, out_features, seed),
            bias: Tensor::zeros(vec![out_features]),
        }
    }

    /// Input width
    pub fn in_features(&self) -> usize {
        self.weight.shape[0]
    }

    /// Output width
    pub fn out_features(&self) -> usize {
        self.weight.shape[1]
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input `[rows, in_features]`
    ///
    /// # Returns
    ///
    /// `(y, cache)` with `y: [rows, out_features]`; the cache keeps `x`.
    pub fn forward(&self, x: &Tensor) -> (Tensor, LinearCache) {
        let y = x.matmul(&self.weight).add(&self.bias);
        (y, LinearCache { x: x.clone() })
    }

    /// Backward pass
    ///
    /// # Arguments
    ///
    /// * `grad_out` - Gradient w.r.t. the output `[rows, out_features]`
    /// * `cache` - Cache from the matching forward call
    pub fn backward(&self, grad_out: &Tensor, cache: &LinearCache) -> LinearGradients {
        let grad_weight = cache.x.transpose().matmul(grad_out);

        let rows = grad_out.rows();
        let out = grad_out.cols();
        let mut grad_bias = vec![0.0; out];
        for row in 0..rows {
            for (g, &v) in grad_bias
                .iter_mut()
                .zip(&grad_out.data[row * out..(row + 1) * out])
            {
                *g += v;
            }
        }

        let grad_x = grad_out.matmul(&self.weight.transpose());

        LinearGradients {
            weight: grad_weight,
            bias: Tensor::new(grad_bias, vec![out]),
            x: grad_x,
        }
    }
}

impl Parameters for TrainableLinear {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("weight".to_string(), &self.weight),
            ("bias".to_string(), &self.bias),
        ]
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![
            ("weight".to_string(), &mut self.weight),
            ("bias".to_string(), &mut self.bias),
        ]
    }
}

/// Cache for linear layer backward pass
#[derive(Debug)]
pub struct LinearCache {
    pub x: Tensor,
}

/// Gradients for linear layer
#[derive(Clone, Debug)]
pub struct LinearGradients {
    pub weight: Tensor,
    pub bias: Tensor,
    /// Gradient to pass to the previous layer (not a parameter)
    pub x: Tensor,
}

impl Parameters for LinearGradients {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("weight".to_string(), &self.weight),
            ("bias".to_string(), &self.bias),
        ]
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![
            ("weight".to_string(), &mut self.weight),
            ("bias".to_string(), &mut self.bias),
        ]
    }
}
