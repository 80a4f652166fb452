//! Multi-Head Self-Attention
//!
//! Lets every patch gather information from every other patch. There is no
//! causal mask: an image has no "future", so all tokens see all tokens.
//!
//! ## Scaled Dot-Product Attention, per head
//!
//! ```text
//! Q, K, V = x @ W_q, x @ W_k, x @ W_v          [n, heads·key_dim]
//! Q_h, K_h, V_h = column band h of Q, K, V      [n, key_dim]
//! scores_h = (Q_h @ K_h^T) / √key_dim           [n, n]
//! weights_h = dropout(softmax(scores_h))
//! out_h = weights_h @ V_h                       [n, key_dim]
//! y = concat(out_0 .. out_{H-1}) @ W_o          [n, dim]
//! ```
//!
//! Each head has its own `key_dim`-wide band of the fused projections, so
//! `heads·key_dim` need not equal `dim`. The ViT uses `key_dim = dim`.
//!
//! ## Backward Pass
//!
//! 1. Backprop through the output projection and split by head
//! 2. Per head, backprop through `weights @ V` (using the dropped weights)
//! 3. Backprop through attention dropout and the row softmax
//! 4. Backprop through the scaled `Q @ K^T`
//! 5. Reassemble the head bands and backprop through the Q/K/V projections
//!
//! The softmax backward couples all elements of a row:
//! `grad_score = w * (grad_w - Σ(grad_w * w))`.

use super::dropout::{DropoutCache, TrainableDropout};
use super::linear::{LinearCache, LinearGradients, TrainableLinear};
use crate::params::{prefixed, Parameters};
use crate::tensor::Tensor;

/// Multi-head self-attention with fused Q/K/V projections
#[derive(Clone, Debug)]
pub struct TrainableMultiHeadAttention {
    pub q_proj: TrainableLinear,
    pub k_proj: TrainableLinear,
    pub v_proj: TrainableLinear,
    pub out_proj: TrainableLinear,
    pub attn_dropout: TrainableDropout,
    pub num_heads: usize,
    pub key_dim: usize,
}

impl TrainableMultiHeadAttention {
    /// Create a new attention layer
    ///
    /// # Arguments
    ///
    /// * `dim` - Token width in and out
    /// * `num_heads` - Number of heads
    /// * `key_dim` - Width of each head's query/key/value
    /// * `dropout_rate` - Dropout probability on attention weights
    /// * `seed` - Random seed for initialization
    pub fn new(dim: usize, num_heads: usize, key_dim: usize, dropout_rate: f32, seed: u64) -> Self {
        let inner = num_heads * key_dim;
        Self {
            q_proj: TrainableLinear::new(dim, inner, seed),
            k_proj: TrainableLinear::new(dim, inner, seed.wrapping_add(1)),
            v_proj: TrainableLinear::new(dim, inner, seed.wrapping_add(2)),
            out_proj: TrainableLinear::new(inner, dim, seed.wrapping_add(3)),
            attn_dropout: TrainableDropout::new(dropout_rate),
            num_heads,
            key_dim,
        }
    }

    fn scale(&self) -> f32 {
        1.0 / (self.key_dim as f32).sqrt()
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor `[seq_len, dim]`
    ///
    /// # Returns
    ///
    /// Tuple of (output `[seq_len, dim]`, cache)
    pub fn forward(&self, x: &Tensor) -> (Tensor, AttentionCache) {
        let (q, q_cache) = self.q_proj.forward(x);
        let (k, k_cache) = self.k_proj.forward(x);
        let (v, v_cache) = self.v_proj.forward(x);
        let scale = self.scale();

        let mut heads = Vec::with_capacity(self.num_heads);
        let mut head_outputs = Vec::with_capacity(self.num_heads);

        for h in 0..self.num_heads {
            let start = h * self.key_dim;
            let q_h = q.narrow_cols(start, self.key_dim);
            let k_h = k.narrow_cols(start, self.key_dim);
            let v_h = v.narrow_cols(start, self.key_dim);

            let scores = q_h.matmul(&k_h.transpose()).mul_scalar(scale);
            let weights = scores.softmax_rows();
            let (weights_dropped, dropout_cache) = self.attn_dropout.forward(&weights);

            head_outputs.push(weights_dropped.matmul(&v_h));
            heads.push(HeadCache {
                q: q_h,
                k: k_h,
                v: v_h,
                weights,
                weights_dropped,
                dropout_cache,
            });
        }

        let concat = Tensor::concat_cols(&head_outputs);
        let (y, out_cache) = self.out_proj.forward(&concat);

        let cache = AttentionCache {
            q_cache,
            k_cache,
            v_cache,
            out_cache,
            heads,
        };
        (y, cache)
    }

    /// Backward pass through attention
    ///
    /// # Arguments
    ///
    /// * `grad_out` - Gradient from next layer `[seq_len, dim]`
    /// * `cache` - Cached values from forward pass
    pub fn backward(&self, grad_out: &Tensor, cache: &AttentionCache) -> AttentionGradients {
        let scale = self.scale();
        let out_grads = self.out_proj.backward(grad_out, &cache.out_cache);

        let mut grad_q_heads = Vec::with_capacity(self.num_heads);
        let mut grad_k_heads = Vec::with_capacity(self.num_heads);
        let mut grad_v_heads = Vec::with_capacity(self.num_heads);

        for (h, head) in cache.heads.iter().enumerate() {
            let grad_head_out = out_grads.x.narrow_cols(h * self.key_dim, self.key_dim);

            let grad_v = head.weights_dropped.transpose().matmul(&grad_head_out);
            let grad_weights_dropped = grad_head_out.matmul(&head.v.transpose());
            let grad_weights = self
                .attn_dropout
                .backward(&grad_weights_dropped, &head.dropout_cache);

            let grad_scores = softmax_rows_backward(&head.weights, &grad_weights);

            grad_q_heads.push(grad_scores.matmul(&head.k).mul_scalar(scale));
            grad_k_heads.push(grad_scores.transpose().matmul(&head.q).mul_scalar(scale));
            grad_v_heads.push(grad_v);
        }

        let q_grads = self
            .q_proj
            .backward(&Tensor::concat_cols(&grad_q_heads), &cache.q_cache);
        let k_grads = self
            .k_proj
            .backward(&Tensor::concat_cols(&grad_k_heads), &cache.k_cache);
        let v_grads = self
            .v_proj
            .backward(&Tensor::concat_cols(&grad_v_heads), &cache.v_cache);

        // Q, K and V all read the same input
        let mut grad_x = q_grads.x.clone();
        grad_x.add_assign(&k_grads.x);
        grad_x.add_assign(&v_grads.x);

        AttentionGradients {
            q_proj: q_grads,
            k_proj: k_grads,
            v_proj: v_grads,
            out_proj: out_grads,
            x: grad_x,
        }
    }
}

/// `grad_scores = w * (grad_w - Σ_row(grad_w * w))`
fn softmax_rows_backward(weights: &Tensor, grad_weights: &Tensor) -> Tensor {
    let cols = weights.cols();
    let mut grad = Vec::with_capacity(weights.numel());
    for (w_row, g_row) in weights
        .data
        .chunks(cols)
        .zip(grad_weights.data.chunks(cols))
    {
        let dot: f32 = w_row.iter().zip(g_row).map(|(w, g)| w * g).sum();
        grad.extend(w_row.iter().zip(g_row).map(|(w, g)| w * (g - dot)));
    }
    Tensor::new(grad, weights.shape.clone())
}

impl Parameters for TrainableMultiHeadAttention {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        let mut out = prefixed("q_proj", self.q_proj.named_tensors());
        out.extend(prefixed("k_proj", self.k_proj.named_tensors()));
        out.extend(prefixed("v_proj", self.v_proj.named_tensors()));
        out.extend(prefixed("out_proj", self.out_proj.named_tensors()));
        out
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = prefixed("q_proj", self.q_proj.named_tensors_mut());
        out.extend(prefixed("k_proj", self.k_proj.named_tensors_mut()));
        out.extend(prefixed("v_proj", self.v_proj.named_tensors_mut()));
        out.extend(prefixed("out_proj", self.out_proj.named_tensors_mut()));
        out
    }
}

/// Per-head values saved by the forward pass
#[derive(Debug)]
pub struct HeadCache {
    pub q: Tensor,
    pub k: Tensor,
    pub v: Tensor,
    /// Softmax output before dropout
    pub weights: Tensor,
    pub weights_dropped: Tensor,
    pub dropout_cache: DropoutCache,
}

/// Cache for attention backward pass
#[derive(Debug)]
pub struct AttentionCache {
    pub q_cache: LinearCache,
    pub k_cache: LinearCache,
    pub v_cache: LinearCache,
    pub out_cache: LinearCache,
    pub heads: Vec<HeadCache>,
}

/// Gradients for attention
#[derive(Clone, Debug)]
pub struct AttentionGradients {
    pub q_proj: LinearGradients,
    pub k_proj: LinearGradients,
    pub v_proj: LinearGradients,
    pub out_proj: LinearGradients,
    pub x: Tensor,
}

impl Parameters for AttentionGradients {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        let mut out = prefixed("q_proj", self.q_proj.named_tensors());
        out.extend(prefixed("k_proj", self.k_proj.named_tensors()));
        out.extend(prefixed("v_proj", self.v_proj.named_tensors()));
        out.extend(prefixed("out_proj", self.out_proj.named_tensors()));
        out
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = prefixed("q_proj", self.q_proj.named_tensors_mut());
        out.extend(prefixed("k_proj", self.k_proj.named_tensors_mut()));
        out.extend(prefixed("v_proj", self.v_proj.named_tensors_mut()));
        out.extend(prefixed("out_proj", self.out_proj.named_tensors_mut()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::test_util::{assert_close, numeric_grad};

    fn sample_input() -> Tensor {
        Tensor::new(
            (0..12).map(|i| ((i * 7 % 11) as f32 - 5.0) * 0.2).collect(),
            vec![3, 4],
        )
    }

    #[test]
    fn test_projection_shapes() {
        let attn = TrainableMultiHeadAttention::new(64, 4, 64, 0.1, 0);
        assert_eq!(attn.q_proj.weight.shape, vec![64, 256]);
        assert_eq!(attn.out_proj.weight.shape, vec![256, 64]);
    }

    #[test]
    fn test_output_shape_and_row_stochastic_weights() {
        let attn = TrainableMultiHeadAttention::new(4, 2, 3, 0.0, 5);
        let (y, cache) = attn.forward(&sample_input());
        assert_eq!(y.shape, vec![3, 4]);
        assert_eq!(cache.heads.len(), 2);
        for head in &cache.heads {
            for row in head.weights.data.chunks(3) {
                let sum: f32 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-5);
                // No causal mask: every key gets some weight
                assert!(row.iter().all(|&w| w > 0.0));
            }
        }
    }

    #[test]
    fn test_token_permutation_equivariance() {
        // Without positional information, attention permutes with its input
        let attn = TrainableMultiHeadAttention::new(4, 2, 4, 0.0, 2);
        let x = sample_input();
        let mut swapped = x.clone();
        swapped.data[..4].copy_from_slice(&x.data[4..8]);
        swapped.data[4..8].copy_from_slice(&x.data[..4]);

        let (y, _) = attn.forward(&x);
        let (y_swapped, _) = attn.forward(&swapped);
        for j in 0..4 {
            assert!((y.data[j] - y_swapped.data[4 + j]).abs() < 1e-5);
            assert!((y.data[8 + j] - y_swapped.data[8 + j]).abs() < 1e-5);
        }
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let attn = TrainableMultiHeadAttention::new(4, 2, 3, 0.0, 13);
        let x = sample_input();
        let probe = Tensor::new(
            (0..12).map(|i| ((i * 5 % 7) as f32 - 3.0) * 0.25).collect(),
            vec![3, 4],
        );

        let (_, cache) = attn.forward(&x);
        let grads = attn.backward(&probe, &cache);

        let numeric = numeric_grad(&x, |x| attn.forward(x).0, &probe);
        assert_close(&grads.x, &numeric, 2e-2);
    }

    #[test]
    fn test_gradient_names_mirror_parameters() {
        let attn = TrainableMultiHeadAttention::new(4, 2, 2, 0.0, 1);
        let (_, cache) = attn.forward(&sample_input());
        let grads = attn.backward(&Tensor::zeros(vec![3, 4]), &cache);

        let p: Vec<String> = attn.named_tensors().into_iter().map(|(n, _)| n).collect();
        let g: Vec<String> = grads.named_tensors().into_iter().map(|(n, _)| n).collect();
        assert_eq!(p, g);
        assert_eq!(p.len(), 8);
        for ((_, pt), (_, gt)) in attn.named_tensors().into_iter().zip(grads.named_tensors()) {
            assert_eq!(pt.shape, gt.shape);
        }
    }
}
