//! Named parameter traversal
//!
//! Every trainable layer, and every gradient struct mirroring a layer,
//! exposes its tensors as an ordered list of `(name, tensor)` pairs. Names are
//! dotted paths such as `blocks.0.attn.q_proj.weight`.
//!
//! Because a layer and its gradient struct list their tensors in the same
//! order under the same names, generic code can walk them in lockstep:
//!
//! - the optimizer pairs each parameter with its gradient and moment buffers
//! - gradient accumulation sums per-sample gradients over a batch
//! - gradient clipping and norm computation visit every gradient once
//! - checkpoints write and restore tensors by name

use crate::tensor::Tensor;

/// Ordered, named access to a set of tensors
pub trait Parameters {
    /// All tensors with their dotted names, in a fixed order
    fn named_tensors(&self) -> Vec<(String, &Tensor)>;

    /// Mutable access in the same order as [`Parameters::named_tensors`]
    fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)>;

    /// Total scalar count
    fn num_parameters(&self) -> usize {
        self.named_tensors().iter().map(|(_, t)| t.numel()).sum()
    }
}

/// Prefix every name in `items` with `prefix.`
pub fn prefixed<T>(prefix: &str, items: Vec<(String, T)>) -> Vec<(String, T)> {
    items
        .into_iter()
        .map(|(name, t)| (format!("{prefix}.{name}"), t))
        .collect()
}

/// Element-wise `acc += other` across two structurally identical sets
///
/// # Panics
///
/// Panics if the two sets disagree on names or shapes.
pub fn accumulate<P: Parameters>(acc: &mut P, other: &P) {
    let others = other.named_tensors();
    let accs = acc.named_tensors_mut();
    assert_eq!(accs.len(), others.len(), "Parameter sets differ in length");
    for ((name, a), (other_name, o)) in accs.into_iter().zip(others) {
        assert_eq!(name, other_name, "Parameter order mismatch");
        a.add_assign(o);
    }
}

/// Multiply every tensor in the set by `factor`
pub fn scale<P: Parameters>(params: &mut P, factor: f32) {
    for (_, t) in params.named_tensors_mut() {
        t.scale_in_place(factor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        a: Tensor,
        b: Tensor,
    }

    impl Parameters for Pair {
        fn named_tensors(&self) -> Vec<(String, &Tensor)> {
            vec![("a".to_string(), &self.a), ("b".to_string(), &self.b)]
        }

        fn named_tensors_mut(&mut self) -> Vec<(String, &mut Tensor)> {
            vec![
                ("a".to_string(), &mut self.a),
                ("b".to_string(), &mut self.b),
            ]
        }
    }

    fn pair(a: f32, b: f32) -> Pair {
        Pair {
            a: Tensor::full(vec![2], a),
            b: Tensor::full(vec![3], b),
        }
    }

    #[test]
    fn test_accumulate_then_scale_averages() {
        let mut acc = pair(1.0, 2.0);
        accumulate(&mut acc, &pair(3.0, 4.0));
        scale(&mut acc, 0.5);
        assert_eq!(acc.a.data, vec![2.0, 2.0]);
        assert_eq!(acc.b.data, vec![3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_prefixed_names_and_count() {
        let p = pair(0.0, 0.0);
        let names: Vec<String> = prefixed("layer", p.named_tensors())
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["layer.a", "layer.b"]);
        assert_eq!(p.num_parameters(), 5);
    }
}
