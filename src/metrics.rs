//! Loss and Classification Metrics
//!
//! Sparse categorical cross-entropy computed from raw logits, plus accuracy
//! and top-k accuracy.
//!
//! ## Cross-Entropy from Logits
//!
//! ```text
//! loss = -log softmax(z)[label] = logsumexp(z) - z[label]
//! dloss/dz = softmax(z) - one_hot(label)
//! ```
//!
//! The max logit is subtracted before exponentiating so large logits never
//! overflow.
//!
//! ## Top-k
//!
//! A sample counts as top-k correct when fewer than `k` classes score
//! strictly higher than the true class. Ties at the boundary count in the
//! sample's favour.

use serde::{Deserialize, Serialize};

/// Loss and gradient for one row of logits
///
/// # Returns
///
/// `(loss, grad)` where `grad = softmax(logits) - one_hot(label)`.
///
/// # Panics
///
/// Panics if `label` is out of range.
pub fn softmax_cross_entropy(logits: &[f32], label: usize) -> (f32, Vec<f32>) {
    assert!(
        label < logits.len(),
        "Label {} out of range for {} classes",
        label,
        logits.len()
    );
    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_vals: Vec<f32> = logits.iter().map(|&z| (z - max_logit).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();

    let loss = sum.ln() - (logits[label] - max_logit);
    let grad = exp_vals
        .iter()
        .enumerate()
        .map(|(j, &e)| {
            let p = e / sum;
            if j == label {
                p - 1.0
            } else {
                p
            }
        })
        .collect();
    (loss, grad)
}

/// Index of the largest logit (first one on ties)
pub fn argmax(logits: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in logits.iter().enumerate() {
        if v > logits[best] {
            best = i;
        }
    }
    best
}

/// Whether `label` is among the `k` highest-scoring classes
pub fn in_top_k(logits: &[f32], label: usize, k: usize) -> bool {
    let target = logits[label];
    logits.iter().filter(|&&v| v > target).count() < k
}

/// Aggregate metrics over a set of samples
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Mean cross-entropy
    pub loss: f32,
    pub accuracy: f32,
    pub top_k_accuracy: f32,
    pub samples: usize,
}

/// Running sums that turn into [`EvalMetrics`]
///
/// Sums are kept in `f64` so long epochs do not lose precision.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricAccumulator {
    loss_sum: f64,
    correct: usize,
    top_k_correct: usize,
    samples: usize,
}

impl MetricAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one sample's logits and loss
    pub fn record(&mut self, logits: &[f32], label: usize, loss: f32, k: usize) {
        self.loss_sum += loss as f64;
        if argmax(logits) == label {
            self.correct += 1;
        }
        if in_top_k(logits, label, k) {
            self.top_k_correct += 1;
        }
        self.samples += 1;
    }

    /// Combine two partial accumulations
    pub fn merge(mut self, other: Self) -> Self {
        self.loss_sum += other.loss_sum;
        self.correct += other.correct;
        self.top_k_correct += other.top_k_correct;
        self.samples += other.samples;
        self
    }

    /// Means over the recorded samples (all zero when nothing was recorded)
    pub fn finish(&self) -> EvalMetrics {
        if self.samples == 0 {
            return EvalMetrics::default();
        }
        let n = self.samples as f64;
        EvalMetrics {
            loss: (self.loss_sum / n) as f32,
            accuracy: (self.correct as f64 / n) as f32,
            top_k_accuracy: (self.top_k_correct as f64 / n) as f32,
            samples: self.samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_logits_give_log_num_classes() {
        let (loss, grad) = softmax_cross_entropy(&[0.0; 4], 2);
        assert!((loss - 4.0f32.ln()).abs() < 1e-6);
        assert!((grad[2] + 0.75).abs() < 1e-6);
        assert!((grad[0] - 0.25).abs() < 1e-6);
        assert!(grad.iter().sum::<f32>().abs() < 1e-6);
    }

    #[test]
    fn test_hand_computed_loss() {
        // softmax([2, 1, 0])[0] = e² / (e² + e + 1)
        let logits = [2.0, 1.0, 0.0];
        let (loss, _) = softmax_cross_entropy(&logits, 0);
        let e = std::f32::consts::E;
        let expected = -(e * e / (e * e + e + 1.0)).ln();
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_large_logits_are_stable() {
        let (loss, grad) = softmax_cross_entropy(&[1000.0, -1000.0], 0);
        assert!(loss.abs() < 1e-6);
        assert!(grad.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_top_k_and_ties() {
        let logits = [0.1, 0.9, 0.5, 0.3, 0.7];
        assert_eq!(argmax(&logits), 1);
        assert!(in_top_k(&logits, 1, 1));
        assert!(!in_top_k(&logits, 2, 2));
        assert!(in_top_k(&logits, 2, 3));
        assert!(in_top_k(&logits, 0, 5));

        // Three-way tie for first: all are in the top 1
        assert!(in_top_k(&[1.0, 1.0, 1.0], 2, 1));
    }

    #[test]
    fn test_accumulator_merge_and_finish() {
        let mut a = MetricAccumulator::new();
        a.record(&[0.0, 1.0], 1, 0.5, 1); // correct
        let mut b = MetricAccumulator::new();
        b.record(&[1.0, 0.0], 1, 1.5, 1); // wrong
        b.record(&[1.0, 0.0], 0, 1.0, 1); // correct

        let m = a.merge(b).finish();
        assert_eq!(m.samples, 3);
        assert!((m.loss - 1.0).abs() < 1e-6);
        assert!((m.accuracy - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(MetricAccumulator::new().finish(), EvalMetrics::default());
    }
}
