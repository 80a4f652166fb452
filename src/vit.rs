//! Trainable Vision Transformer
//!
//! The complete classifier: patch extraction, patch encoding, a stack of
//! transformer blocks, and an MLP classification head, with a hand-written
//! backward pass through all of it.
//!
//! ## Pipeline (one image)
//!
//! ```text
//! image [H, W, C]
//!   → extract_patches            [N, P·P·C]
//!   → PatchEncoder               [N, d]
//!   → TransformerBlock × L       [N, d]
//!   → LayerNorm                  [N, d]
//!   → flatten                    [1, N·d]
//!   → Dropout
//!   → MLP (mlp_head_units)       [1, 1024]
//!   → Linear                     [1, num_classes]   (raw logits)
//! ```
//!
//! There is no class token: the head sees every encoded patch through the
//! flattened representation.
//!
//! ## Backpropagation
//!
//! `backward` replays the pipeline in reverse, feeding each layer the
//! gradient of the one after it together with the cache saved by `forward`.
//! Per-image passes are independent, so a batch is processed by running
//! images in parallel and summing their gradients (see [`crate::train`]).
//!
//! ## Training vs Evaluation
//!
//! Dropout is only active while the model is in training mode. [`predict`]
//! and [`crate::train::evaluate`] switch to evaluation mode for the duration
//! of the call.
//!
//! [`predict`]: TrainableViT::predict

use crate::config::ModelConfig;
use crate::error::Result;
use crate::layers::{
    extract_patches, BlockCache, BlockGradients, DropoutCache, LayerNormCache,
    LayerNormGradients, LinearCache, LinearGradients, MLPCache, MLPGradients, PatchEncoder,
    PatchEncoderCache, PatchEncoderGradients, TrainableDropout, TrainableLayerNorm,
    TrainableLinear, TrainableMLP, TrainableTransformerBlock,
};
use crate::params::{prefixed, Parameters};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Vision Transformer classifier with explicit forward and backward passes
#[derive(Clone, Debug)]
pub struct TrainableViT {
    pub(crate) config: ModelConfig,
    pub(crate) encoder: PatchEncoder,
    pub(crate) blocks: Vec<TrainableTransformerBlock>,
    pub(crate) ln_final: TrainableLayerNorm,
    pub(crate) head_dropout: TrainableDropout,
    pub(crate) head_mlp: TrainableMLP,
    pub(crate) classifier: TrainableLinear,
    training: bool,
}

impl TrainableViT {
    /// Build a freshly initialized model
    ///
    /// Weights are seeded from `config.seed`, so equal configs give equal
    /// models. Each component draws its own 64-bit seed from a `StdRng`
    /// seeded with `config.seed`, so any seed value is valid and no two
    /// components share one regardless of depth. The model starts in
    /// training mode.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VitError::InvalidConfig`] if the config fails
    /// [`ModelConfig::validate`].
    pub fn new(config: &ModelConfig) -> Result<Self> {
        config.validate()?;
        let mut seeds = StdRng::seed_from_u64(config.seed);
        let dim = config.projection_dim;

        let encoder = PatchEncoder::new(
            config.num_patches(),
            config.patch_dim(),
            dim,
            seeds.random(),
        );
        let blocks = (0..config.transformer_layers)
            .map(|_| TrainableTransformerBlock::new(config, seeds.random()))
            .collect();

        let flattened = config.flattened_dim();
        let head_mlp = TrainableMLP::new(
            flattened,
            &config.mlp_head_units,
            config.head_dropout,
            seeds.random(),
        );
        let classifier = TrainableLinear::new(
            head_mlp.out_features(flattened),
            config.num_classes,
            seeds.random(),
        );

        Ok(Self {
            config: config.clone(),
            encoder,
            blocks,
            ln_final: TrainableLayerNorm::new(dim, config.layer_norm_eps),
            head_dropout: TrainableDropout::new(config.head_dropout),
            head_mlp,
            classifier,
            training: true,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Enable or disable dropout everywhere
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        for block in &mut self.blocks {
            block.set_training(training);
        }
        self.head_dropout.training = training;
        self.head_mlp.set_training(training);
    }

    /// Run `f` with dropout disabled, then restore the previous mode
    pub fn with_eval_mode<R>(&mut self, f: impl FnOnce(&Self) -> R) -> R {
        let was_training = self.training;
        self.set_training(false);
        let out = f(self);
        self.set_training(was_training);
        out
    }

    /// Encode one image into its `[num_patches, projection_dim]` sequence
    ///
    /// Runs patch extraction, the patch encoder and every transformer block,
    /// stopping before the classification head.
    pub fn encode(&self, image: &Tensor) -> Tensor {
        self.check_image(image);
        let patches = extract_patches(image, self.config.patch_size);
        let (mut x, _) = self.encoder.forward(&patches);
        for block in &self.blocks {
            x = block.forward(&x).0;
        }
        x
    }

    /// Forward pass for one image `[H, W, C]`
    ///
    /// # Returns
    ///
    /// Tuple of (logits `[1, num_classes]`, cache)
    ///
    /// # Panics
    ///
    /// Panics if the image shape differs from the configured geometry.
    pub fn forward(&self, image: &Tensor) -> (Tensor, ViTCache) {
        self.check_image(image);
        let patches = extract_patches(image, self.config.patch_size);
        let (mut x, encoder_cache) = self.encoder.forward(&patches);

        let mut block_caches = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let (x_next, cache) = block.forward(&x);
            block_caches.push(cache);
            x = x_next;
        }

        let (x_normed, ln_final_cache) = self.ln_final.forward(&x);
        let flat = x_normed.reshape(&[1, self.config.flattened_dim()]);
        let (flat_dropped, head_dropout_cache) = self.head_dropout.forward(&flat);
        let (features, head_mlp_cache) = self.head_mlp.forward(&flat_dropped);
        let (logits, classifier_cache) = self.classifier.forward(&features);

        let cache = ViTCache {
            encoder_cache,
            block_caches,
            ln_final_cache,
            head_dropout_cache,
            head_mlp_cache,
            classifier_cache,
        };
        (logits, cache)
    }

    /// Backward pass for one image
    ///
    /// # Arguments
    ///
    /// * `grad_logits` - Gradient of the loss w.r.t. the logits `[1, num_classes]`
    /// * `cache` - Cache from the matching forward call
    pub fn backward(&self, grad_logits: &Tensor, cache: &ViTCache) -> ViTGradients {
        let classifier = self
            .classifier
            .backward(grad_logits, &cache.classifier_cache);
        let head_mlp = self.head_mlp.backward(&classifier.x, &cache.head_mlp_cache);
        let grad_flat = self
            .head_dropout
            .backward(&head_mlp.x, &cache.head_dropout_cache);

        let grad_normed = grad_flat.reshape(&[self.config.num_patches(), self.config.projection_dim]);
        let ln_final = self.ln_final.backward(&grad_normed, &cache.ln_final_cache);

        let mut grad_x = ln_final.x.clone();
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (block, block_cache) in self.blocks.iter().zip(&cache.block_caches).rev() {
            let grads = block.backward(&grad_x, block_cache);
            grad_x = grads.x.clone();
            blocks.push(grads);
        }
        blocks.reverse();

        let encoder = self.encoder.backward(&grad_x, &cache.encoder_cache);

        ViTGradients {
            encoder,
            blocks,
            ln_final,
            head_mlp,
            classifier,
        }
    }

    /// Logits for a batch of images `[B, H, W, C]`, in evaluation mode
    ///
    /// # Returns
    ///
    /// `[B, num_classes]`
    pub fn predict(&mut self, images: &Tensor) -> Tensor {
        assert_eq!(
            images.shape.len(),
            4,
            "Expected images of shape [batch, height, width, channels], got {:?}",
            images.shape
        );
        let batch = images.shape[0];
        let num_classes = self.config.num_classes;
        self.with_eval_mode(|model| {
            let rows: Vec<Vec<f32>> = (0..batch)
                .into_par_iter()
                .map(|b| model.forward(&images.index_first(b)).0.data)
                .collect();
            Tensor::new(rows.concat(), vec![batch, num_classes])
        })
    }

    fn check_image(&self, image: &Tensor) {
        let c = &self.config;
        assert_eq!(
            image.shape,
            vec![c.image_size, c.image_size, c.num_channels],
            "Image shape does not match the model configuration"
        );
    }
}

impl Parameters for TrainableViT {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        let mut out = prefixed("encoder", self.encoder.named_tensors());
        for (i, block) in self.blocks.iter().enumerate() {
            out.extend(prefixed(&format!("blocks.{i}"), block.named_tensors()));
        }
        out.extend(prefixed("ln_final", self.ln_final.named_tensors()));
        out.extend(prefixed("head_mlp", self.head_mlp.named_tensors()));
        out.extend(prefixed("classifier", self.classifier.named_tensors()));
        out
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = prefixed("encoder", self.encoder.named_tensors_mut());
        for (i, block) in self.blocks.iter_mut().enumerate() {
            out.extend(prefixed(&format!("blocks.{i}"), block.named_tensors_mut()));
        }
        out.extend(prefixed("ln_final", self.ln_final.named_tensors_mut()));
        out.extend(prefixed("head_mlp", self.head_mlp.named_tensors_mut()));
        out.extend(prefixed("classifier", self.classifier.named_tensors_mut()));
        out
    }
}

/// Everything `backward` needs from one image's forward pass
#[derive(Debug)]
pub struct ViTCache {
    encoder_cache: PatchEncoderCache,
    block_caches: Vec<BlockCache>,
    ln_final_cache: LayerNormCache,
    head_dropout_cache: DropoutCache,
    head_mlp_cache: MLPCache,
    classifier_cache: LinearCache,
}

/// Gradients for every model parameter, named like the model's own
#[derive(Clone, Debug)]
pub struct ViTGradients {
    pub encoder: PatchEncoderGradients,
    pub blocks: Vec<BlockGradients>,
    pub ln_final: LayerNormGradients,
    pub head_mlp: MLPGradients,
    pub classifier: LinearGradients,
}

impl Parameters for ViTGradients {
    fn named_tensors(&self) -> Vec<(String, &Tensor)> {
        let mut out = prefixed("encoder", self.encoder.named_tensors());
        for (i, block) in self.blocks.iter().enumerate() {
            out.extend(prefixed(&format!("blocks.{i}"), block.named_tensors()));
        }
        out.extend(prefixed("ln_final", self.ln_final.named_tensors()));
        out.extend(prefixed("head_mlp", self.head_mlp.named_tensors()));
        out.extend(prefixed("classifier", self.classifier.named_tensors()));
        out
    }

    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = prefixed("encoder", self.encoder.named_tensors_mut());
        for (i, block) in self.blocks.iter_mut().enumerate() {
            out.extend(prefixed(&format!("blocks.{i}"), block.named_tensors_mut()));
        }
        out.extend(prefixed("ln_final", self.ln_final.named_tensors_mut()));
        out.extend(prefixed("head_mlp", self.head_mlp.named_tensors_mut()));
        out.extend(prefixed("classifier", self.classifier.named_tensors_mut()));
        out
    }
}
