//! Multi-Layer Perceptron (MLP)
//!
//! A stack of dense layers, each followed by GELU and dropout. The same
//! component serves two roles in the ViT:
//!
//! - the feed-forward sublayer of every transformer block
//!   (`transformer_units`, default `[2·d, d]`, dropout 0.1)
//! - the hidden part of the classification head
//!   (`mlp_head_units`, default `[2048, 1024]`, dropout 0.5)
//!
//! ## Architecture
//!
//! ```text
//! x → Linear₀ → GELU → Dropout → Linear₁ → GELU → Dropout → ... → y
//! ```
//!
//! The activation follows every layer, including the last one. A block's
//! feed-forward output is therefore GELU-activated before the residual add.

use super::activation::{gelu_backward, gelu_forward};
use super::dropout::{DropoutCache, TrainableDropout};
use super::linear::{LinearCache, LinearGradients, TrainableLinear};
use crate::params::{prefixed, Parameters};
use crate::tensor::Tensor;

/// Dense stack with GELU and dropout after every layer
#[derive(Clone, Debug)]
pub struct TrainableMLP {
    pub layers: Vec<TrainableLinear>,
    pub dropout: TrainableDropout,
}

impl TrainableMLP {
    /// Create an MLP
    ///
    /// # Arguments
    ///
    /// * `in_features` - Input width
    /// * `hidden_units` - Output width of each successive layer
    /// * `dropout_rate` - Dropout probability after each activation
    /// * `seed` - Random seed for initialization
    pub fn new(in_features: usize, hidden_units: &[usize], dropout_rate: f32, seed: u64) -> Self {
        let mut layers = Vec::with_capacity(hidden_units.len());
        let mut width = in_features;
        for (i, &units) in hidden_units.iter().enumerate() {
            layers.push(TrainableLinear::new(width, units, seed.wrapping_add(1000 * i as u64)));
            width = units;
        }
        Self {
            layers,
            dropout: TrainableDropout::new(dropout_rate),
        }
    }

    /// Output width (the input width when there are no layers)
    pub fn out_features(&self, in_features: usize) -> usize {
        self.layers
            .last()
            .map_or(in_features, TrainableLinear::out_features)
    }

    pub fn set_training(&mut self, training: bool) {
        self.dropout.training = training;
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor `[rows, in_features]`
    ///
    /// # Returns
    ///
    /// Tuple of (output, cache)
    pub fn forward(&self, x: &Tensor) -> (Tensor, MLPCache) {
        let mut stages = Vec::with_capacity(self.layers.len());
        let mut h = x.clone();

        for layer in &self.layers {
            let (pre, linear_cache) = layer.forward(&h);
            let activated = gelu_forward(&pre);
            let (dropped, dropout_cache) = self.dropout.forward(&activated);
            stages.push(MLPStageCache {
                linear_cache,
                pre_activation: pre,
                dropout_cache,
            });
            h = dropped;
        }

        (h, MLPCache { stages })
    }

    /// Backward pass, walking the stages in reverse
    pub fn backward(&self, grad_out: &Tensor, cache: &MLPCache) -> MLPGradients {
        let mut grad = grad_out.clone();
        let mut layer_grads = Vec::with_capacity(self.layers.len());

        for (layer, stage) in self.layers.iter().zip(&cache.stages).rev() {
            let grad_activated = self.dropout.backward(&grad, &stage.dropout_cache);
            let grad_pre = gelu_backward(&grad_activated, &stage.pre_activation);
            let grads = layer.backward(&grad_pre, &stage.linear_cache);
            grad = grads.x.clone();
            layer_grads.push(grads);
        }
        layer_grads.reverse();

        MLPGradients {
            layers: layer_grads,
            x: grad,
        }
    }
}

fn layer_names<T>(items: impl Iterator<Item = (usize, Vec<(String, T)>)>) -> Vec<(String, T)> {
    items
        .flat_map(|(i, named)| prefixed(&format!("layers.{i}"), named))
        .collect()
}

impl Parameters for TrainableMLP {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        layer_names(self.layers.iter().map(|l| l.named_tensors()).enumerate())
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        layer_names(
            self.layers
                .iter_mut()
                .map(|l| l.named_tensors_mut())
                .enumerate(),
        )
    }
}

/// Per-layer values saved by the forward pass
#[derive(Debug)]
pub struct MLPStageCache {
    pub linear_cache: LinearCache,
    pub pre_activation: Tensor, // needed for GELU backward
    pub dropout_cache: DropoutCache,
}

/// Cache for MLP backward pass
#[derive(Debug)]
pub struct MLPCache {
    pub stages: Vec<MLPStageCache>,
}

/// Gradients for MLP
#[derive(Clone, Debug)]
pub struct MLPGradients {
    pub layers: Vec<LinearGradients>,
    pub x: Tensor,
}

impl Parameters for MLPGradients {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        layer_names(self.layers.iter().map(|l| l.named_tensors()).enumerate())
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        layer_names(
            self.layers
                .iter_mut()
                .map(|l| l.named_tensors_mut())
                .enumerate(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::test_util::{assert_close, numeric_grad};

    #[test]
    fn test_shapes_follow_units() {
        let mlp = TrainableMLP::new(6, &[12, 6], 0.0, 3);
        let (y, cache) = mlp.forward(&Tensor::zeros(vec![5, 6]));
        assert_eq!(y.shape, vec![5, 6]);
        assert_eq!(cache.stages.len(), 2);
        assert_eq!(mlp.out_features(6), 6);
    }

    #[test]
    fn test_activation_after_last_layer() {
        // GELU output is bounded below by about -0.17
        let mlp = TrainableMLP::new(4, &[3], 0.0, 8);
        let x = Tensor::new((0..8).map(|i| (i as f32 - 4.0) * 3.0).collect(), vec![2, 4]);
        let (y, _) = mlp.forward(&x);
        assert!(y.data.iter().all(|&v| v > -0.2));
    }

    #[test]
    fn test_empty_mlp_is_identity() {
        let mlp = TrainableMLP::new(4, &[], 0.5, 1);
        let x = Tensor::new(vec![1.0, -2.0, 3.0, -4.0], vec![1, 4]);
        let (y, cache) = mlp.forward(&x);
        assert_eq!(y, x);
        assert_eq!(mlp.backward(&x, &cache).x, x);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let mlp = TrainableMLP::new(3, &[5, 3], 0.0, 17);
        let x = Tensor::new(vec![0.4, -0.9, 1.1, -0.3, 0.6, 0.2], vec![2, 3]);
        let probe = Tensor::new(vec![0.5, -1.0, 0.3, 0.8, 0.1, -0.6], vec![2, 3]);

        let (_, cache) = mlp.forward(&x);
        let grads = mlp.backward(&probe, &cache);

        let numeric = numeric_grad(&x, |x| mlp.forward(x).0, &probe);
        assert_close(&grads.x, &numeric, 2e-2);
    }

    #[test]
    fn test_gradient_names_mirror_parameters() {
        let mlp = TrainableMLP::new(2, &[3, 2], 0.0, 1);
        let (_, cache) = mlp.forward(&Tensor::zeros(vec![1, 2]));
        let grads = mlp.backward(&Tensor::zeros(vec![1, 2]), &cache);

        let p: Vec<String> = mlp.named_tensors().into_iter().map(|(n, _)| n).collect();
        let g: Vec<String> = grads.named_tensors().into_iter().map(|(n, _)| n).collect();
        assert_eq!(p, g);
        assert_eq!(p[0], "layers.0.weight");
        assert_eq!(p[3], "layers.1.bias");
    }
}
