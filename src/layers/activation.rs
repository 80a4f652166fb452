//! Activation Functions
//!
//! ## GELU (Gaussian Error Linear Unit)
//!
//! Every dense layer in the ViT's feed-forward sublayers and classifier head
//! is followed by GELU, in its exact erf form:
//!
//! ```text
//! GELU(x)  = x × Φ(x) = 0.5 × x × (1 + erf(x / √2))
//! GELU'(x) = Φ(x) + x × φ(x),    φ(x) = exp(-x²/2) / √(2π)
//! ```
//!
//! `std` has no `erf`, so it comes from `libm`.

use crate::tensor::Tensor;
use rayon::prelude::*;
use std::f32::consts::{FRAC_1_SQRT_2, PI};

#[inline]
fn normal_cdf(x: f32) -> f32 {
    0.5 * (1.0 + libm::erff(x * FRAC_1_SQRT_2))
}

#[inline]
fn normal_pdf(x: f32) -> f32 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// GELU activation (forward pass), element-wise
pub fn gelu_forward(x: &Tensor) -> Tensor {
    let result = x.data.par_iter().map(|&val| val * normal_cdf(val)).collect();
    Tensor::new(result, x.shape.clone())
}

/// GELU derivative (backward pass)
///
/// # Arguments
///
/// * `grad_out` - Gradient from the next layer
/// * `x` - Pre-activation input saved during the forward pass
///
/// # Returns
///
/// `grad_out * GELU'(x)`
pub fn gelu_backward(grad_out: &Tensor, x: &Tensor) -> Tensor {
    let grad_data: Vec<f32> = x
        .data
        .par_iter()
        .zip(&grad_out.data)
        .map(|(&x_val, &grad_val)| grad_val * (normal_cdf(x_val) + x_val * normal_pdf(x_val)))
        .collect();

    Tensor::new(grad_data, x.shape.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gelu_known_values() {
        // Exact erf values, not the tanh approximation
        let x = Tensor::new(vec![0.0, 1.0, -3.0, -1.5, 0.5], vec![5]);
        let y = gelu_forward(&x);
        assert_eq!(y.data[0], 0.0);
        let expected = [0.0, 0.841345, -0.004050, -0.100211, 0.345731];
        for (got, want) in y.data.iter().zip(expected) {
            assert!((got - want).abs() < 1e-5, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_gelu_backward_matches_finite_differences() {
        let eps = 1e-3;
        for &v in &[-2.0f32, -0.5, 0.0, 0.7, 2.5] {
            let x = Tensor::new(vec![v], vec![1]);
            let analytic = gelu_backward(&Tensor::new(vec![1.0], vec![1]), &x).data[0];
            let plus = gelu_forward(&Tensor::new(vec![v + eps], vec![1])).data[0];
            let minus = gelu_forward(&Tensor::new(vec![v - eps], vec![1])).data[0];
            let numeric = (plus - minus) / (2.0 * eps);
            assert!(
                (analytic - numeric).abs() < 1e-2,
                "x={v}: analytic {analytic} vs numeric {numeric}"
            );
        }
    }
}
