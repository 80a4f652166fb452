//! Layer Normalization
//!
//! Normalizes each token (row) to zero mean and unit variance, then applies a
//! learnable scale (gamma) and shift (beta). The ViT applies it before
//! attention, before the feed-forward sublayer, and once more before the
//! classifier head.
//!
//! ## Forward Pass
//!
//! ```text
//! mean   = sum(x) / N
//! var    = sum((x - mean)²) / N
//! x_norm = (x - mean) / √(var + ε)
//! y      = γ * x_norm + β
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! grad_γ      = sum_rows(grad_y * x_norm)
//! grad_β      = sum_rows(grad_y)
//! grad_x_norm = grad_y * γ
//! grad_x      = (grad_x_norm - mean(grad_x_norm) - x_norm * mean(grad_x_norm * x_norm)) / √(var + ε)
//! ```
//!
//! The two mean terms account for every element feeding the row's mean and
//! variance.

use crate::params::Parameters;
use crate::tensor::Tensor;

/// Per-token layer normalization
#[derive(Clone, Debug)]
pub struct TrainableLayerNorm {
    pub gamma: Tensor, // Scale [dim]
    pub beta: Tensor,  // Shift [dim]
    pub eps: f32,
}

impl TrainableLayerNorm {
    /// Create a layer norm over `dim` features with gamma=1, beta=0
    pub fn new(dim: usize, eps: f32) -> Self {
        Self {
            gamma: Tensor::full(vec![dim], 1.0),
            beta: Tensor::zeros(vec![dim]),
            eps,
        }
    }

    /// Forward pass over `[rows, dim]`
    pub fn forward(&self, x: &Tensor) -> (Tensor, LayerNormCache) {
        let rows = x.rows();
        let dim = x.cols();
        assert_eq!(
            dim,
            self.gamma.numel(),
            "LayerNorm expects {} features, got {}",
            self.gamma.numel(),
            dim
        );

        let mut x_norm = vec![0.0; rows * dim];
        let mut y = vec![0.0; rows * dim];
        let mut std = Vec::with_capacity(rows);

        for i in 0..rows {
            let row = &x.data[i * dim..(i + 1) * dim];
            let mean = row.iter().sum::<f32>() / dim as f32;
            let var = row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / dim as f32;
            let s = (var + self.eps).sqrt();
            std.push(s);

            for j in 0..dim {
                let idx = i * dim + j;
                let n = (row[j] - mean) / s;
                x_norm[idx] = n;
                y[idx] = n * self.gamma.data[j] + self.beta.data[j];
            }
        }

        let cache = LayerNormCache {
            x_norm: Tensor::new(x_norm, vec![rows, dim]),
            std,
        };
        (Tensor::new(y, vec![rows, dim]), cache)
    }

    /// Backward pass
    pub fn backward(&self, grad_out: &Tensor, cache: &LayerNormCache) -> LayerNormGradients {
        let dim = self.gamma.numel();
        let rows = grad_out.rows();

        let mut grad_gamma = vec![0.0; dim];
        let mut grad_beta = vec![0.0; dim];
        let mut grad_x = vec![0.0; rows * dim];

        for i in 0..rows {
            let start = i * dim;
            let g_row = &grad_out.data[start..start + dim];
            let n_row = &cache.x_norm.data[start..start + dim];

            let mut mean_g = 0.0;
            let mut mean_gn = 0.0;
            for j in 0..dim {
                grad_gamma[j] += g_row[j] * n_row[j];
                grad_beta[j] += g_row[j];

                let g_norm = g_row[j] * self.gamma.data[j];
                mean_g += g_norm;
                mean_gn += g_norm * n_row[j];
            }
            mean_g /= dim as f32;
            mean_gn /= dim as f32;

            let s = cache.std[i];
            for j in 0..dim {
                let g_norm = g_row[j] * self.gamma.data[j];
                grad_x[start + j] = (g_norm - mean_g - n_row[j] * mean_gn) / s;
            }
        }

        LayerNormGradients {
            gamma: Tensor::new(grad_gamma, vec![dim]),
            beta: Tensor::new(grad_beta, vec![dim]),
            x: Tensor::new(grad_x, vec![rows, dim]),
        }
    }
}

impl Parameters for TrainableLayerNorm {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("gamma".to_string(), &self.gamma),
            ("beta".to_string(), &self.beta),
        ]
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![
            ("gamma".to_string(), &mut self.gamma),
            ("beta".to_string(), &mut self.beta),
        ]
    }
}

/// Cache for layer norm backward pass
#[derive(Debug)]
pub struct LayerNormCache {
    pub x_norm: Tensor,
    /// √(var + ε) per row
    pub std: Vec<f32>,
}

/// Gradients for layer norm
#[derive(Clone, Debug)]
pub struct LayerNormGradients {
    pub gamma: Tensor,
    pub beta: Tensor,
    pub x: Tensor,
}

impl Parameters for LayerNormGradients {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("gamma".to_string(), &self.gamma),
            ("beta".to_string(), &self.beta),
        ]
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![
            ("gamma".to_string(), &mut self.gamma),
            ("beta".to_string(), &mut self.beta),
        ]
    }
}
