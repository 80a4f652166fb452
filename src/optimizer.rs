//! AdamW Optimizer Implementation
//!
//! Adam with decoupled weight decay, the optimizer the ViT is trained with.
//!
//! ## Algorithm
//!
//! For each parameter θ with gradient g:
//!
//! ```text
//! θ = θ - λ * θ                    # Decoupled weight decay
//! m = β₁ * m + (1 - β₁) * g        # First moment (momentum)
//! v = β₂ * v + (1 - β₂) * g²       # Second moment (variance)
//! m_hat = m / (1 - β₁^t)           # Bias correction
//! v_hat = v / (1 - β₂^t)           # Bias correction
//! θ = θ - α * m_hat / (√v_hat + ε) # Parameter update
//! ```
//!
//! Defaults for the ViT: α = 1e-3, λ = 1e-4, β₁ = 0.9, β₂ = 0.999, ε = 1e-7.
//!
//! ## Weight Decay
//!
//! Decay is applied to **every** parameter (weights, biases, LayerNorm scale
//! and shift, the position table) before the Adam step, and is **not**
//! scaled by the learning rate: with λ = 1e-4 each step shrinks θ by 0.01%.
//!
//! ## Parameter Matching
//!
//! Moment buffers are created from the model's
//! [`Parameters::named_tensors`] list and matched to gradients by position.
//! Every update checks that the gradient list carries the same names, so a
//! gradient set from a different architecture fails loudly.
//!
//! ## Example
//!
//! ```rust
//! use vitrail::optimizer::{adamw_update, AdamWOptimizer};
//! use vitrail::{ModelConfig, TrainableViT};
//!
//! let model = TrainableViT::new(&ModelConfig::tiny(3)).unwrap();
//! let optimizer = AdamWOptimizer::new(&model);
//! assert_eq!(optimizer.step, 0);
//! ```

use crate::config::TrainingConfig;
use crate::params::Parameters;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Tensors above this size are updated in parallel
const PARALLEL_UPDATE_THRESHOLD: usize = 1000;

/// AdamW optimizer state
///
/// One first-moment (`m`) and second-moment (`v`) buffer per parameter, in
/// the model's parameter order.
#[derive(Clone, Debug)]
pub struct AdamWOptimizer {
    pub names: Vec<String>,
    pub m: Vec<Tensor>,
    pub v: Vec<Tensor>,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    /// Number of updates applied so far
    pub step: usize,
}

impl AdamWOptimizer {
    /// Zeroed moments for every parameter, with Keras-style defaults
    pub fn new<P: Parameters>(model: &P) -> Self {
        let named = model.named_tensors();
        Self {
            names: named.iter().map(|(n, _)| n.clone()).collect(),
            m: named.iter().map(|(_, t)| Tensor::zeros(t.shape.clone())).collect(),
            v: named.iter().map(|(_, t)| Tensor::zeros(t.shape.clone())).collect(),
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
        }
    }

    /// Optimizer with the betas and epsilon from a training config
    pub fn from_config<P: Parameters>(model: &P, config: &TrainingConfig) -> Self {
        Self {
            beta1: config.beta1,
            beta2: config.beta2,
            epsilon: config.epsilon,
            ..Self::new(model)
        }
    }
}

/// Per-step constants shared by every tensor update
#[derive(Clone, Copy)]
struct StepConstants {
    lr: f32,
    weight_decay: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    bias_correction1: f32,
    bias_correction2: f32,
}

impl StepConstants {
    #[inline]
    fn apply(&self, param: &mut f32, grad: f32, m: &mut f32, v: &mut f32) {
        *param -= self.weight_decay * *param;
        *m = self.beta1 * *m + (1.0 - self.beta1) * grad;
        *v = self.beta2 * *v + (1.0 - self.beta2) * grad * grad;
        let m_hat = *m / self.bias_correction1;
        let v_hat = *v / self.bias_correction2;
        *param -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
    }
}

/// Apply one AdamW step to every parameter
///
/// # Arguments
///
/// * `model` - Parameters to update in place
/// * `grads` - Gradients with the same names and shapes as `model`
/// * `optimizer` - Moment buffers, advanced by one step
/// * `lr` - Learning rate
/// * `weight_decay` - Decoupled decay coefficient, applied as `θ -= λθ`
///
/// # Panics
///
/// Panics if the gradient list does not match the optimizer's parameters.
pub fn adamw_update<P: Parameters, G: Parameters>(
    model: &mut P,
    grads: &G,
    optimizer: &mut AdamWOptimizer,
    lr: f32,
    weight_decay: f32,
) {
    optimizer.step += 1;
    let step = optimizer.step as i32;
    let consts = StepConstants {
        lr,
        weight_decay,
        beta1: optimizer.beta1,
        beta2: optimizer.beta2,
        epsilon: optimizer.epsilon,
        bias_correction1: 1.0 - optimizer.beta1.powi(step),
        bias_correction2: 1.0 - optimizer.beta2.powi(step),
    };

    let params = model.named_tensors_mut();
    let grads = grads.named_tensors();
    assert_eq!(params.len(), optimizer.names.len(), "Model does not match optimizer state");
    assert_eq!(grads.len(), optimizer.names.len(), "Gradients do not match optimizer state");

    for (i, ((name, param), (grad_name, grad))) in params.into_iter().zip(grads).enumerate() {
        assert_eq!(name, optimizer.names[i], "Parameter order changed");
        assert_eq!(grad_name, name, "Gradient {grad_name} paired with parameter {name}");
        assert_eq!(param.shape, grad.shape, "Gradient shape mismatch for {name}");

        let m = &mut optimizer.m[i].data;
        let v = &mut optimizer.v[i].data;

        if param.data.len() > PARALLEL_UPDATE_THRESHOLD {
            param
                .data
                .par_iter_mut()
                .zip(grad.data.par_iter())
                .zip(m.par_iter_mut().zip(v.par_iter_mut()))
                .for_each(|((p, &g), (m_val, v_val))| consts.apply(p, g, m_val, v_val));
        } else {
            for (((p, &g), m_val), v_val) in param
                .data
                .iter_mut()
                .zip(&grad.data)
                .zip(m.iter_mut())
                .zip(v.iter_mut())
            {
                consts.apply(p, g, m_val, v_val);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Toy {
        weight: Tensor,
        bias: Tensor,
        position_embedding: Tensor,
    }

    impl Parameters for Toy {
        fn named_tensors(&self) -> Vec<(String, &Tensor)> {
            vec![
                ("weight".to_string(), &self.weight),
                ("bias".to_string(), &self.bias),
                ("encoder.position_embedding".to_string(), &self.position_embedding),
            ]
        }

        fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
            vec![
                ("weight".to_string(), &mut self.weight),
                ("bias".to_string(), &mut self.bias),
                (
                    "encoder.position_embedding".to_string(),
                    &mut self.position_embedding,
                ),
            ]
        }
    }

    fn toy(value: f32) -> Toy {
        Toy {
            weight: Tensor::full(vec![2, 2], value),
            bias: Tensor::full(vec![2], value),
            position_embedding: Tensor::full(vec![3, 2], value),
        }
    }

    #[test]
    fn test_defaults() {
        let opt = AdamWOptimizer::new(&toy(0.0));
        assert_eq!(opt.names.len(), 3);
        assert_eq!((opt.beta1, opt.beta2, opt.epsilon), (0.9, 0.999, 1e-7));
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        // Bias correction makes the first step ≈ lr·sign(g)
        let mut model = toy(1.0);
        let grads = toy(0.5);
        let mut opt = AdamWOptimizer::new(&model);
        adamw_update(&mut model, &grads, &mut opt, 0.01, 0.0);

        assert_eq!(opt.step, 1);
        for (_, t) in model.named_tensors() {
            for &v in &t.data {
                assert!((v - 0.99).abs() < 1e-5, "got {v}");
            }
        }
        assert!((opt.m[0].data[0] - 0.05).abs() < 1e-7);
    }

    #[test]
    fn test_weight_decay_hits_every_parameter_independent_of_lr() {
        for lr in [1e-3, 0.1] {
            let mut model = toy(1.0);
            let zero_grads = toy(0.0);
            let mut opt = AdamWOptimizer::new(&model);
            adamw_update(&mut model, &zero_grads, &mut opt, lr, 1e-4);

            for (name, t) in model.named_tensors() {
                for &v in &t.data {
                    assert!((v - 0.9999).abs() < 1e-7, "{name} at lr={lr}: got {v}");
                }
            }
        }
    }

    #[test]
    fn test_decay_precedes_adam_step() {
        let mut model = toy(2.0);
        let grads = toy(1.0);
        let mut opt = AdamWOptimizer::new(&model);
        adamw_update(&mut model, &grads, &mut opt, 0.01, 0.5);
        // 2 - 0.5·2 = 1, then the first Adam step moves it by ≈ lr
        assert!(model.bias.data.iter().all(|&v| (v - 0.99).abs() < 1e-5));
    }

    #[test]
    fn test_large_tensors_take_parallel_path() {
        struct Big(Tensor);
        impl Parameters for Big {
            fn named_tensors(&self) -> Vec<(String, &Tensor)> {
                vec![("w".to_string(), &self.0)]
            }
            fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
                vec![("w".to_string(), &mut self.0)]
            }
        }

        let mut model = Big(Tensor::full(vec![50, 50], 1.0));
        let grads = Big(Tensor::full(vec![50, 50], -2.0));
        let mut opt = AdamWOptimizer::new(&model);
        adamw_update(&mut model, &grads, &mut opt, 0.01, 0.0);
        assert!(model.0.data.iter().all(|&v| (v - 1.01).abs() < 1e-5));
    }

    #[test]
    #[should_panic(expected = "Gradients do not match")]
    fn test_rejects_mismatched_gradients() {
        struct One(Tensor);
        impl Parameters for One {
            fn named_tensors(&self) -> Vec<(String, &Tensor)> {
                vec![("weight".to_string(), &self.0)]
            }
            fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
                vec![("weight".to_string(), &mut self.0)]
            }
        }
        let mut model = toy(1.0);
        let mut opt = AdamWOptimizer::new(&model);
        adamw_update(&mut model, &One(Tensor::zeros(vec![2, 2])), &mut opt, 0.1, 0.0);
    }
}
