//! Dropout Layer
//!
//! Randomly zeros activations during training and rescales the survivors by
//! `1 / (1 - rate)` (inverted dropout), so evaluation is a plain identity.
//! Masks come from the thread-local RNG, which keeps per-sample forward
//! passes independent when a batch is processed in parallel.

use crate::tensor::Tensor;

/// Dropout with a training/evaluation switch
#[derive(Clone, Debug)]
pub struct TrainableDropout {
    pub rate: f32,
    pub training: bool,
}

impl TrainableDropout {
    /// Create a dropout layer in training mode
    ///
    /// # Panics
    ///
    /// Panics unless `0.0 <= rate <= 1.0`.
    pub fn new(rate: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&rate),
            "Dropout rate must be between 0.0 and 1.0"
        );
        Self {
            rate,
            training: true,
        }
    }

    /// Forward pass with caching for backward
    ///
    /// Returns the input unchanged (and an empty mask) in evaluation mode or
    /// when `rate == 0`.
    pub fn forward(&self, x: &Tensor) -> (Tensor, DropoutCache) {
        if !self.training || self.rate == 0.0 {
            let cache = DropoutCache {
                mask: None,
                scale: 1.0,
            };
            return (x.clone(), cache);
        }

        if self.rate >= 1.0 {
            let cache = DropoutCache {
                mask: Some(vec![false; x.data.len()]),
                scale: 1.0,
            };
            return (Tensor::zeros(x.shape.clone()), cache);
        }

        let scale = 1.0 / (1.0 - self.rate);
        let mut mask = Vec::with_capacity(x.data.len());
        let mut output = Tensor::zeros(x.shape.clone());

        for (out, &val) in output.data.iter_mut().zip(&x.data) {
            let keep = rand::random::<f32>() >= self.rate;
            mask.push(keep);
            if keep {
                *out = val * scale;
            }
        }

        (
            output,
            DropoutCache {
                mask: Some(mask),
                scale,
            },
        )
    }

    /// Backward pass: route gradients through the same mask
    pub fn backward(&self, grad_output: &Tensor, cache: &DropoutCache) -> Tensor {
        match &cache.mask {
            Some(mask) => {
                let mut grad_input = Tensor::zeros(grad_output.shape.clone());
                for ((g_in, &g_out), &keep) in
                    grad_input.data.iter_mut().zip(&grad_output.data).zip(mask)
                {
                    if keep {
                        *g_in = g_out * cache.scale;
                    }
                }
                grad_input
            }
            None => grad_output.clone(),
        }
    }
}

/// Cache for dropout backward pass
#[derive(Debug)]
pub struct DropoutCache {
    /// Dropout mask (true = kept), `None` if dropout was inactive
    pub mask: Option<Vec<bool>>,
    /// Scaling factor applied to kept values
    pub scale: f32,
}
