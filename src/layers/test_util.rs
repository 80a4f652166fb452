//! Finite-difference helpers shared by the layer tests

use crate::tensor::Tensor;

const FD_EPS: f32 = 1e-2;

/// Central-difference gradient of `sum(f(x) * probe)` with respect to `x`
pub fn numeric_grad<F>(x: &Tensor, f: F, probe: &Tensor) -> Tensor
where
    F: Fn(&Tensor) -> Tensor,
{
    let objective = |t: &Tensor| -> f64 {
        let y = f(t);
        assert_eq!(y.shape, probe.shape, "probe must match the output shape");
        y.data
            .iter()
            .zip(&probe.data)
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum()
    };

    let mut grad = vec![0.0; x.numel()];
    let mut shifted = x.clone();
    for (i, g) in grad.iter_mut().enumerate() {
        let orig = x.data[i];
        shifted.data[i] = orig + FD_EPS;
        let plus = objective(&shifted);
        shifted.data[i] = orig - FD_EPS;
        let minus = objective(&shifted);
        shifted.data[i] = orig;
        *g = ((plus - minus) / (2.0 * FD_EPS as f64)) as f32;
    }
    Tensor::new(grad, x.shape.clone())
}

/// Element-wise closeness, relative for large magnitudes
pub fn assert_close(actual: &Tensor, expected: &Tensor, tol: f32) {
    assert_eq!(actual.shape, expected.shape, "shape mismatch");
    for (i, (&a, &e)) in actual.data.iter().zip(&expected.data).enumerate() {
        let bound = tol * e.abs().max(1.0);
        assert!(
            (a - e).abs() <= bound,
            "element {i}: analytic {a} vs numeric {e}"
        );
    }
}
