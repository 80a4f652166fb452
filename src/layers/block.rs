//! Transformer Block
//!
//! One encoder layer of the ViT: multi-head self-attention and a
//! feed-forward MLP, each wrapped in a pre-norm residual connection.
//!
//! ## Architecture
//!
//! ```text
//! x → LayerNorm → Attention → (+) → LayerNorm → MLP → (+) → output
//! │                            ↑  │                    ↑
//! └────────────────────────────┘  └────────────────────┘
//! ```
//!
//! Input and output are both `[num_patches, projection_dim]`, so blocks
//! stack without adapters.
//!
//! ## Backward Pass
//!
//! At each residual connection the gradient splits into the sublayer path
//! and the skip path, and the two contributions are summed.

use super::attention::{AttentionCache, AttentionGradients, TrainableMultiHeadAttention};
use super::layer_norm::{LayerNormCache, LayerNormGradients, TrainableLayerNorm};
use super::mlp::{MLPCache, MLPGradients, TrainableMLP};
use crate::config::ModelConfig;
use crate::params::{prefixed, Parameters};
use crate::tensor::Tensor;

/// Transformer block combining attention and MLP with residuals
#[derive(Clone, Debug)]
pub struct TrainableTransformerBlock {
    pub ln1: TrainableLayerNorm,
    pub attn: TrainableMultiHeadAttention,
    pub ln2: TrainableLayerNorm,
    pub mlp: TrainableMLP,
}

impl TrainableTransformerBlock {
    /// Create a block for the architecture in `config`
    ///
    /// Each head gets a key dimension of `projection_dim`.
    pub fn new(config: &ModelConfig, seed: u64) -> Self {
        let dim = config.projection_dim;
        Self {
            ln1: TrainableLayerNorm::new(dim, config.layer_norm_eps),
            attn: TrainableMultiHeadAttention::new(
                dim,
                config.num_heads,
                dim,
                config.attention_dropout,
                seed,
            ),
            ln2: TrainableLayerNorm::new(dim, config.layer_norm_eps),
            mlp: TrainableMLP::new(
                dim,
                &config.transformer_units,
                config.mlp_dropout,
                seed.wrapping_add(100),
            ),
        }
    }

    pub fn set_training(&mut self, training: bool) {
        self.attn.attn_dropout.training = training;
        self.mlp.set_training(training);
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor `[num_patches, projection_dim]`
    ///
    /// # Returns
    ///
    /// Tuple of (output, cache); the output has the input's shape.
    pub fn forward(&self, x: &Tensor) -> (Tensor, BlockCache) {
        let (ln1_out, ln1_cache) = self.ln1.forward(x);
        let (attn_out, attn_cache) = self.attn.forward(&ln1_out);
        let x_after_attn = attn_out.add(x);

        let (ln2_out, ln2_cache) = self.ln2.forward(&x_after_attn);
        let (mlp_out, mlp_cache) = self.mlp.forward(&ln2_out);
        let y = mlp_out.add(&x_after_attn);

        let cache = BlockCache {
            ln1_cache,
            attn_cache,
            ln2_cache,
            mlp_cache,
        };
        (y, cache)
    }

    /// Backward pass through transformer block
    pub fn backward(&self, grad_out: &Tensor, cache: &BlockCache) -> BlockGradients {
        // Second residual: skip path plus MLP path
        let mlp_grads = self.mlp.backward(grad_out, &cache.mlp_cache);
        let ln2_grads = self.ln2.backward(&mlp_grads.x, &cache.ln2_cache);
        let mut grad_x_after_attn = grad_out.clone();
        grad_x_after_attn.add_assign(&ln2_grads.x);

        // First residual: skip path plus attention path
        let attn_grads = self.attn.backward(&grad_x_after_attn, &cache.attn_cache);
        let ln1_grads = self.ln1.backward(&attn_grads.x, &cache.ln1_cache);
        let mut grad_x = grad_x_after_attn;
        grad_x.add_assign(&ln1_grads.x);

        BlockGradients {
            ln1: ln1_grads,
            attn: attn_grads,
            ln2: ln2_grads,
            mlp: mlp_grads,
            x: grad_x,
        }
    }
}

impl Parameters for TrainableTransformerBlock {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        let mut out = prefixed("ln1", self.ln1.named_tensors());
        out.extend(prefixed("attn", self.attn.named_tensors()));
        out.extend(prefixed("ln2", self.ln2.named_tensors()));
        out.extend(prefixed("mlp", self.mlp.named_tensors()));
        out
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = prefixed("ln1", self.ln1.named_tensors_mut());
        out.extend(prefixed("attn", self.attn.named_tensors_mut()));
        out.extend(prefixed("ln2", self.ln2.named_tensors_mut()));
        out.extend(prefixed("mlp", self.mlp.named_tensors_mut()));
        out
    }
}

/// Cache for transformer block backward pass
#[derive(Debug)]
pub struct BlockCache {
    pub ln1_cache: LayerNormCache,
    pub attn_cache: AttentionCache,
    pub ln2_cache: LayerNormCache,
    pub mlp_cache: MLPCache,
}

/// Gradients for transformer block
#[derive(Clone, Debug)]
pub struct BlockGradients {
    pub ln1: LayerNormGradients,
    pub attn: AttentionGradients,
    pub ln2: LayerNormGradients,
    pub mlp: MLPGradients,
    pub x: Tensor,
}

impl Parameters for BlockGradients {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        let mut out = prefixed("ln1", self.ln1.named_tensors());
        out.extend(prefixed("attn", self.attn.named_tensors()));
        out.extend(prefixed("ln2", self.ln2.named_tensors()));
        out.extend(prefixed("mlp", self.mlp.named_tensors()));
        out
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = prefixed("ln1", self.ln1.named_tensors_mut());
        out.extend(prefixed("attn", self.attn.named_tensors_mut()));
        out.extend(prefixed("ln2", self.ln2.named_tensors_mut()));
        out.extend(prefixed("mlp", self.mlp.named_tensors_mut()));
        out
    }
}
