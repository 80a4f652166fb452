//! Patch Encoder
//!
//! Projects every flattened patch to `projection_dim` with one shared linear
//! layer and adds a learned embedding for the patch's slot in the grid.
//!
//! ```text
//! patches [N, patch_dim] → Linear → [N, d]
//!                                    + position_embedding[0..N] [N, d]
//!                                    = encoded [N, d]
//! ```
//!
//! Slot `i` always receives row `i` of the table, regardless of what the
//! patch contains. Since every slot is used exactly once per image, the
//! gradient of the table is simply the upstream gradient.

use super::linear::{uniform_init, LinearCache, TrainableLinear};
use crate::params::{prefixed, Parameters};
use crate::tensor::Tensor;

/// Embedding tables start uniform in (-0.05, 0.05)
const EMBEDDING_INIT_LIMIT: f32 = 0.05;

/// Linear patch projection plus learned position embeddings
#[derive(Clone, Debug)]
pub struct PatchEncoder {
    pub projection: TrainableLinear,
    /// `[num_patches, projection_dim]`
    pub position_embedding: Tensor,
}

impl PatchEncoder {
    /// Create an encoder for `num_patches` patches of length `patch_dim`
    pub fn new(num_patches: usize, patch_dim: usize, projection_dim: usize, seed: u64) -> Self {
        Self {
            projection: TrainableLinear::new(patch_dim, projection_dim, seed),
            position_embedding: Tensor::new(
                uniform_init(num_patches * projection_dim, seed.wrapping_add(1), EMBEDDING_INIT_LIMIT),
                vec![num_patches, projection_dim],
            ),
        }
    }

    /// Number of patch slots the table covers
    pub fn num_patches(&self) -> usize {
        self.position_embedding.shape[0]
    }

    /// Encode one image's patches
    ///
    /// # Panics
    ///
    /// Panics if the patch count differs from the position table size.
    pub fn forward(&self, patches: &Tensor) -> (Tensor, PatchEncoderCache) {
        assert_eq!(
            patches.rows(),
            self.num_patches(),
            "Got {} patches but the position table has {} slots",
            patches.rows(),
            self.num_patches()
        );
        let (projected, projection_cache) = self.projection.forward(patches);
        let encoded = projected.add(&self.position_embedding);
        (encoded, PatchEncoderCache { projection_cache })
    }

    /// Backward pass
    pub fn backward(&self, grad_out: &Tensor, cache: &PatchEncoderCache) -> PatchEncoderGradients {
        let projection = self.projection.backward(grad_out, &cache.projection_cache);
        PatchEncoderGradients {
            projection,
            position_embedding: grad_out.clone(),
        }
    }
}

impl Parameters for PatchEncoder {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        let mut out = prefixed("projection", self.projection.named_tensors());
        out.push(("position_embedding".to_string(), &self.position_embedding));
        out
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = prefixed("projection", self.projection.named_tensors_mut());
        out.push((
            "position_embedding".to_string(),
            &mut self.position_embedding,
        ));
        out
    }
}

#[derive(Debug)]
pub struct PatchEncoderCache {
    pub projection_cache: LinearCache,
}

#[derive(Clone, Debug)]
pub struct PatchEncoderGradients {
    pub projection: super::linear::LinearGradients,
    pub position_embedding: Tensor,
}

impl Parameters for PatchEncoderGradients {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        let mut out = prefixed("projection", self.projection.named_tensors());
        out.push(("position_embedding".to_string(), &self.position_embedding));
        out
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = prefixed("projection", self.projection.named_tensors_mut());
        out.push((
            "position_embedding".to_string(),
            &mut self.position_embedding,
        ));
        out
    }
}
