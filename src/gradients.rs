//! Gradient Utilities
//!
//! Norm computation for monitoring and optional global-norm clipping.
//!
//! ## Algorithm
//!
//! ```text
//! norm = √(Σ gradient²)  // over every tensor in the set
//! if norm > max_norm:
//!     gradients *= (max_norm / norm)
//! ```
//!
//! Every tensor is scaled by the same factor, so the update direction is
//! preserved.

use crate::params::{scale, Parameters};

/// Global L2 norm over every tensor in `grads`
pub fn compute_grad_norm<P: Parameters>(grads: &P) -> f32 {
    grads
        .named_tensors()
        .iter()
        .map(|(_, t)| t.sum_squares())
        .sum::<f32>()
        .sqrt()
}

/// Clip gradients to a maximum global norm
///
/// # Returns
///
/// The norm before clipping.
pub fn clip_gradients<P: Parameters>(grads: &mut P, max_norm: f32) -> f32 {
    let norm = compute_grad_norm(grads);
    if norm > max_norm {
        scale(grads, max_norm / norm);
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    struct Grads(Tensor, Tensor);

    impl Parameters for Grads {
        fn named_tensors(&self) -> Vec<(String, &Tensor)> {
            vec![("a".to_string(), &self.0), ("b".to_string(), &self.1)]
        }
        fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
            vec![("a".to_string(), &mut self.0), ("b".to_string(), &mut self.1)]
        }
    }

    #[test]
    fn test_norm_spans_all_tensors() {
        let g = Grads(
            Tensor::new(vec![3.0], vec![1]),
            Tensor::new(vec![4.0], vec![1]),
        );
        assert_eq!(compute_grad_norm(&g), 5.0);
    }

    #[test]
    fn test_clip_scales_to_max_norm() {
        let mut g = Grads(
            Tensor::new(vec![3.0], vec![1]),
            Tensor::new(vec![4.0], vec![1]),
        );
        let before = clip_gradients(&mut g, 1.0);
        assert_eq!(before, 5.0);
        assert!((compute_grad_norm(&g) - 1.0).abs() < 1e-6);
        assert!((g.0.data[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_clip_leaves_small_gradients_alone() {
        let mut g = Grads(
            Tensor::new(vec![0.3], vec![1]),
            Tensor::new(vec![0.4], vec![1]),
        );
        clip_gradients(&mut g, 1.0);
        assert_eq!(g.0.data[0], 0.3);
    }
}
