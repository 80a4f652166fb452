//! Neural Network Layers
//!
//! Every layer of the Vision Transformer, each with an explicit forward and
//! backward pass.
//!
//! ## Layers
//!
//! - **patches**: Image to patch-sequence extraction (no parameters)
//! - **patch_encoder**: Patch projection plus position embeddings
//! - **activation**: GELU activation function (forward and backward)
//! - **linear**: Fully connected layer
//! - **layer_norm**: Layer normalization
//! - **dropout**: Dropout regularization
//! - **mlp**: Dense stack with GELU and dropout after each layer
//! - **attention**: Multi-head self-attention
//! - **block**: Complete transformer block
//!
//! ## Design Pattern
//!
//! Each trainable layer follows a consistent pattern:
//!
//! ```rust,ignore
//! pub struct TrainableLayer {
//!     // Parameters (weights, biases, etc.)
//! }
//!
//! impl TrainableLayer {
//!     pub fn new(...) -> Self { }
//!     pub fn forward(&self, x: &Tensor) -> (Tensor, Cache) { }
//!     pub fn backward(&self, grad: &Tensor, cache: &Cache) -> Gradients { }
//! }
//! ```
//!
//! Layers and their gradient structs both implement
//! [`crate::params::Parameters`] with identical names, so optimizer and
//! checkpoint code never needs to know the layer types.

pub mod activation;
pub mod attention;
pub mod block;
pub mod dropout;
pub mod layer_norm;
pub mod linear;
pub mod mlp;
pub mod patch_encoder;
pub mod patches;

#[cfg(test)]
pub(crate) mod test_util;

pub use activation::{gelu_backward, gelu_forward};
pub use attention::{AttentionCache, AttentionGradients, TrainableMultiHeadAttention};
pub use block::{BlockCache, BlockGradients, TrainableTransformerBlock};
pub use dropout::{DropoutCache, TrainableDropout};
pub use layer_norm::{LayerNormCache, LayerNormGradients, TrainableLayerNorm};
pub use linear::{glorot_uniform, LinearCache, LinearGradients, TrainableLinear};
pub use mlp::{MLPCache, MLPGradients, TrainableMLP};
pub use patch_encoder::{PatchEncoder, PatchEncoderCache, PatchEncoderGradients};
pub use patches::{extract_patches, extract_patches_batch};
