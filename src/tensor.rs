//! Tensor Operations for the Vision Transformer
//!
//! A minimal row-major `f32` tensor. Every layer in this crate works on 2-D
//! activations (`[tokens, features]` for one image), so the kernels here are
//! specialised for matrices. Higher-rank tensors exist only as containers for
//! images (`[height, width, channels]`) and batches, which are sliced back
//! into matrices before any math happens.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f32>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[num_patches, projection_dim]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! ## Example
//!
//! ```rust
//! use vitrail::Tensor;
//!
//! let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
//! let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let c = a.matmul(&b);
//! assert_eq!(c.shape, vec![2, 2]);
//! ```
//!
//! ## Performance
//!
//! Large matrix products use a cache-blocked kernel parallelised over row
//! blocks with Rayon; elementwise operations and row softmax also run in
//! parallel. Small inputs stay sequential to avoid scheduling overhead.

use rayon::prelude::*;

/// Work threshold (m·n·k) above which matmul switches to the parallel kernel
const PARALLEL_MATMUL_THRESHOLD: usize = 1_000;

/// A multi-dimensional array stored in row-major order
///
/// # Memory Layout
///
/// For shape `[2, 3]`, data is stored as
/// `[r0c0, r0c1, r0c2, r1c0, r1c1, r1c2]` and strides are `[3, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f32>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor with given data and shape
    ///
    /// # Panics
    ///
    /// Panics if the product of shape dimensions doesn't equal data length
    ///
    /// # Example
    ///
    /// ```rust
    /// # use vitrail::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.shape, vec![2, 2]);
    /// ```
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected_size: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_size,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_size
        );

        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros
    ///
    /// ```rust
    /// # use vitrail::Tensor;
    /// let tensor = Tensor::zeros(vec![3, 4]);
    /// assert_eq!(tensor.data.len(), 12);
    /// assert!(tensor.data.iter().all(|&x| x == 0.0));
    /// ```
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Create a tensor filled with a constant
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![value; size], shape)
    }

    /// Compute strides from shape (row-major layout)
    ///
    /// For shape `[d0, d1, d2]`, strides are `[d1*d2, d2, 1]`
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Number of rows of a matrix
    pub fn rows(&self) -> usize {
        assert_eq!(self.shape.len(), 2, "rows() requires a 2-D tensor");
        self.shape[0]
    }

    /// Number of columns of a matrix
    pub fn cols(&self) -> usize {
        assert_eq!(self.shape.len(), 2, "cols() requires a 2-D tensor");
        self.shape[1]
    }

    /// SIMD-friendly inner loop: `result[j] += a_val * b[j]`
    ///
    /// Written as a plain zip so LLVM auto-vectorises it.
    #[inline(always)]
    fn matmul_inner_simd(a_val: f32, b: &[f32], result: &mut [f32]) {
        for (r, &b_val) in result.iter_mut().zip(b.iter()) {
            *r += a_val * b_val;
        }
    }

    /// Matrix multiplication `[m, k] @ [k, n] -> [m, n]`
    ///
    /// Small products run a straightforward triple loop; anything above
    /// [`PARALLEL_MATMUL_THRESHOLD`] uses the blocked parallel kernel.
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2-D or inner dimensions differ.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use vitrail::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]);
    /// assert_eq!(a.matmul(&b).data, a.data);
    /// ```
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "Unsupported matmul shapes: {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let n = other.shape[1];
        let k = self.shape[1];

        if m * n * k >= PARALLEL_MATMUL_THRESHOLD {
            return self.matmul_parallel_blocked(other, m, n, k);
        }

        let mut result = vec![0.0; m * n];
        for i in 0..m {
            for l in 0..k {
                let a_val = self.data[i * k + l];
                Self::matmul_inner_simd(
                    a_val,
                    &other.data[l * n..(l + 1) * n],
                    &mut result[i * n..(i + 1) * n],
                );
            }
        }

        Tensor::new(result, vec![m, n])
    }

    /// Parallel cache-blocked matrix multiplication
    ///
    /// Processes 8×8 blocks so the working set stays in L1, and distributes
    /// row blocks across the Rayon pool. Inner loops walk memory sequentially.
    fn matmul_parallel_blocked(&self, other: &Tensor, m: usize, n: usize, k: usize) -> Tensor {
        const BLOCK_SIZE: usize = 8;

        let mut result = vec![0.0; m * n];

        result
            .par_chunks_mut(BLOCK_SIZE * n)
            .enumerate()
            .for_each(|(block_i, result_block)| {
                let i_start = block_i * BLOCK_SIZE;
                let i_end = (i_start + BLOCK_SIZE).min(m);

                for j_start in (0..n).step_by(BLOCK_SIZE) {
                    let j_end = (j_start + BLOCK_SIZE).min(n);

                    for k_start in (0..k).step_by(BLOCK_SIZE) {
                        let k_end = (k_start + BLOCK_SIZE).min(k);

                        for i in i_start..i_end {
                            let row_offset = (i - i_start) * n;
                            for k_idx in k_start..k_end {
                                let a_val = self.data[i * k + k_idx];
                                Self::matmul_inner_simd(
                                    a_val,
                                    &other.data[k_idx * n + j_start..k_idx * n + j_end],
                                    &mut result_block[row_offset + j_start..row_offset + j_end],
                                );
                            }
                        }
                    }
                }
            });

        Tensor::new(result, vec![m, n])
    }

    /// Row-wise softmax of a matrix
    ///
    /// Uses the numerically stable form `exp(x - max) / Σ exp(x - max)`.
    ///
    /// ```rust
    /// # use vitrail::Tensor;
    /// let t = Tensor::new(vec![1.0, 2.0, 3.0, 1.0, 1.0, 1.0], vec![2, 3]);
    /// let s = t.softmax_rows();
    /// let row0: f32 = s.data[..3].iter().sum();
    /// assert!((row0 - 1.0).abs() < 1e-6);
    /// ```
    pub fn softmax_rows(&self) -> Tensor {
        let rows = self.rows();
        let cols = self.cols();

        let result: Vec<f32> = (0..rows)
            .into_par_iter()
            .flat_map_iter(|i| {
                let row = &self.data[i * cols..(i + 1) * cols];
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let exp_values: Vec<f32> = row.iter().map(|&x| (x - max).exp()).collect();
                let sum: f32 = exp_values.iter().sum();
                exp_values.into_iter().map(move |val| val / sum)
            })
            .collect();

        Tensor::new(result, self.shape.clone())
    }

    /// Element-wise addition with bias broadcasting
    ///
    /// Supported patterns:
    ///
    /// 1. **Exact match**: Same shape
    /// 2. **Broadcast last dim**: `[*, n] + [n]` (bias addition)
    ///
    /// ```rust
    /// # use vitrail::Tensor;
    /// let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// let bias = Tensor::new(vec![10.0, 20.0], vec![2]);
    /// assert_eq!(a.add(&bias).data, vec![11.0, 22.0, 13.0, 24.0]);
    /// ```
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        if other.shape.len() == 1 && self.shape.last() == Some(&other.shape[0]) {
            let last_dim = other.shape[0];
            let result: Vec<f32> = self
                .data
                .par_iter()
                .enumerate()
                .map(|(i, &x)| x + other.data[i % last_dim])
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        panic!(
            "Unsupported broadcast for add: {:?} + {:?}",
            self.shape, other.shape
        );
    }

    /// In-place element-wise accumulation (`self += other`, same shape)
    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(
            self.shape, other.shape,
            "Shapes must match for accumulation"
        );
        self.data
            .par_iter_mut()
            .zip(&other.data)
            .for_each(|(a, &b)| *a += b);
    }

    /// Multiply all elements by scalar
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let result = self.data.par_iter().map(|&x| x * scalar).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Scale all elements in place
    pub fn scale_in_place(&mut self, scalar: f32) {
        self.data.par_iter_mut().for_each(|x| *x *= scalar);
    }

    /// Reshape tensor to new shape (element count must stay the same)
    ///
    /// ```rust
    /// # use vitrail::Tensor;
    /// let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    /// assert_eq!(t.reshape(&[1, 6]).shape, vec![1, 6]);
    /// ```
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape {:?} into {:?}: element count mismatch",
            self.shape,
            new_shape
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Matrix transpose `[m, n] -> [n, m]`
    ///
    /// ```rust
    /// # use vitrail::Tensor;
    /// let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
    /// let tt = t.transpose();
    /// assert_eq!(tt.shape, vec![3, 2]);
    /// assert_eq!(tt.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    /// ```
    pub fn transpose(&self) -> Tensor {
        let rows = self.rows();
        let cols = self.cols();
        let mut result = vec![0.0; rows * cols];

        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }

        Tensor::new(result, vec![cols, rows])
    }

    /// Copy out a contiguous band of columns `[rows, start..start + width]`
    ///
    /// Used to split the fused multi-head projections into per-head matrices.
    pub fn narrow_cols(&self, start: usize, width: usize) -> Tensor {
        let rows = self.rows();
        let cols = self.cols();
        assert!(
            start + width <= cols,
            "Column range {}..{} out of bounds for {} columns",
            start,
            start + width,
            cols
        );

        let mut result = Vec::with_capacity(rows * width);
        for i in 0..rows {
            let row_start = i * cols + start;
            result.extend_from_slice(&self.data[row_start..row_start + width]);
        }
        Tensor::new(result, vec![rows, width])
    }

    /// Concatenate matrices with equal row counts along the column axis
    ///
    /// Inverse of repeated [`Tensor::narrow_cols`].
    pub fn concat_cols(parts: &[Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_cols needs at least one tensor");
        let rows = parts[0].rows();
        for p in parts {
            assert_eq!(p.rows(), rows, "All parts must have the same row count");
        }
        let total_cols: usize = parts.iter().map(|p| p.cols()).sum();

        let mut result = Vec::with_capacity(rows * total_cols);
        for i in 0..rows {
            for p in parts {
                let c = p.cols();
                result.extend_from_slice(&p.data[i * c..(i + 1) * c]);
            }
        }
        Tensor::new(result, vec![rows, total_cols])
    }

    /// Take the `index`-th slice along the first axis
    ///
    /// `[b, d1, d2, ...] -> [d1, d2, ...]`
    pub fn index_first(&self, index: usize) -> Tensor {
        assert!(
            !self.shape.is_empty() && index < self.shape[0],
            "Index {} out of bounds for shape {:?}",
            index,
            self.shape
        );
        let inner: usize = self.shape[1..].iter().product();
        let start = index * inner;
        Tensor::new(
            self.data[start..start + inner].to_vec(),
            self.shape[1..].to_vec(),
        )
    }

    /// Stack equally-shaped tensors along a new leading axis
    pub fn stack(items: &[Tensor]) -> Tensor {
        assert!(!items.is_empty(), "stack needs at least one tensor");
        let inner_shape = items[0].shape.clone();
        let mut data = Vec::with_capacity(items.len() * items[0].numel());
        for item in items {
            assert_eq!(
                item.shape, inner_shape,
                "All stacked tensors must share a shape"
            );
            data.extend_from_slice(&item.data);
        }
        let mut shape = Vec::with_capacity(inner_shape.len() + 1);
        shape.push(items.len());
        shape.extend(inner_shape);
        Tensor::new(data, shape)
    }

    /// Sum of squared elements
    pub fn sum_squares(&self) -> f32 {
        self.data.par_iter().map(|&v| v * v).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides_row_major() {
        let t = Tensor::zeros(vec![2, 3, 4]);
        assert_eq!(t.strides, vec![12, 4, 1]);
    }

    #[test]
    fn test_matmul_small_and_blocked_agree() {
        // 20x30 @ 30x10 crosses the parallel threshold
        let a = Tensor::new((0..600).map(|i| (i % 7) as f32 - 3.0).collect(), vec![20, 30]);
        let b = Tensor::new((0..300).map(|i| (i % 5) as f32 * 0.5).collect(), vec![30, 10]);
        let fast = a.matmul(&b);

        let mut naive = vec![0.0f32; 200];
        for i in 0..20 {
            for j in 0..10 {
                for l in 0..30 {
                    naive[i * 10 + j] += a.data[i * 30 + l] * b.data[l * 10 + j];
                }
            }
        }
        for (x, y) in fast.data.iter().zip(&naive) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    #[should_panic(expected = "Matrix dimensions incompatible")]
    fn test_matmul_rejects_mismatch() {
        let a = Tensor::zeros(vec![2, 3]);
        let b = Tensor::zeros(vec![2, 3]);
        let _ = a.matmul(&b);
    }

    #[test]
    fn test_softmax_rows_stable_for_large_values() {
        let t = Tensor::new(vec![1000.0, 1000.0, -1000.0, 0.0], vec![2, 2]);
        let s = t.softmax_rows();
        assert!((s.data[0] - 0.5).abs() < 1e-6);
        assert!((s.data[1] - 0.5).abs() < 1e-6);
        assert!(s.data[2] < 1e-6);
        assert!((s.data[3] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_narrow_and_concat_cols_invert() {
        let t = Tensor::new((0..12).map(|i| i as f32).collect(), vec![3, 4]);
        let left = t.narrow_cols(0, 1);
        let right = t.narrow_cols(1, 3);
        assert_eq!(left.data, vec![0.0, 4.0, 8.0]);
        assert_eq!(Tensor::concat_cols(&[left, right]), t);
    }

    #[test]
    fn test_stack_and_index_first() {
        let a = Tensor::new(vec![1.0, 2.0], vec![1, 2]);
        let b = Tensor::new(vec![3.0, 4.0], vec![1, 2]);
        let s = Tensor::stack(&[a.clone(), b.clone()]);
        assert_eq!(s.shape, vec![2, 1, 2]);
        assert_eq!(s.index_first(0), a);
        assert_eq!(s.index_first(1), b);
    }

    #[test]
    fn test_add_assign_and_scale() {
        let mut a = Tensor::full(vec![2, 2], 1.0);
        a.add_assign(&Tensor::full(vec![2, 2], 2.0));
        a.scale_in_place(0.5);
        assert_eq!(a.data, vec![1.5; 4]);
        assert_eq!(a.sum_squares(), 9.0);
    }
}
