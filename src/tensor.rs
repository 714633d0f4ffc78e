//! Tensor Storage for the Bigram Model
//!
//! A deliberately small tensor: a flat `Vec<f32>` plus shape and strides in
//! row-major order. The bigram model only ever needs three things from it:
//! row lookups into the embedding table, a softmax over the last axis, and
//! random normal initialization.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f32>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, time, vocab]`)
//! - **Strides**: Step sizes for each dimension to compute flat indices
//!
//! ## Example
//!
//! ```rust
//! use touchstone::Tensor;
//!
//! let logits = Tensor::new(vec![1.0, 2.0, 3.0, 1.0, 1.0, 1.0], vec![2, 3]);
//! let probs = logits.softmax(-1);
//! let row_sum: f32 = probs.row(1).iter().sum();
//! assert!((row_sum - 1.0).abs() < 1e-6);
//! ```
//!
//! ## Parallelism
//!
//! Softmax fans out over rows with Rayon. Nothing in
//! here draws random numbers off the calling thread, so a seeded RNG still
//! gives reproducible results.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

/// A multi-dimensional array of `f32` values
///
/// # Memory Layout
///
/// For shape `[2, 3]`, data is stored as
/// `[r0c0, r0c1, r0c2, r1c0, r1c1, r1c2]` with strides `[3, 1]`.
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
    /// # use touchstone::Tensor;
    /// let tensor = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
    /// assert_eq!(tensor.strides, vec![2, 1]);
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
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Create a tensor with entries drawn i.i.d. from `N(0, std²)`
    ///
    /// The caller owns the RNG so that initialization is reproducible from a
    /// single seed.
    ///
    /// # Panics
    ///
    /// Panics if `std` is negative or not finite
    ///
    /// # Example
    ///
    /// ```rust
    /// # use touchstone::Tensor;
    /// use rand::{rngs::StdRng, SeedableRng};
    ///
    /// let mut rng = StdRng::seed_from_u64(1337);
    /// let table = Tensor::randn(vec![4, 4], 1.0, &mut rng);
    /// assert_eq!(table.data.len(), 16);
    /// ```
    pub fn randn<R: Rng + ?Sized>(shape: Vec<usize>, std: f32, rng: &mut R) -> Self {
        assert!(
            std.is_finite() && std >= 0.0,
            "Standard deviation must be finite and non-negative, got {}",
            std
        );
        let normal = Normal::new(0.0, std).expect("standard deviation checked above");
        let size: usize = shape.iter().product();
        let data = (0..size).map(|_| normal.sample(rng)).collect();
        Self::new(data, shape)
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

    /// Length of the last axis
    fn last_dim(&self) -> usize {
        *self
            .shape
            .last()
            .expect("tensor must have at least one dimension")
    }

    /// Borrow row `i` of a 2-D tensor
    pub fn row(&self, i: usize) -> &[f32] {
        assert_eq!(self.shape.len(), 2, "row() requires a 2-D tensor");
        let cols = self.shape[1];
        &self.data[i * cols..(i + 1) * cols]
    }

    /// Mutably borrow row `i` of a 2-D tensor
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        assert_eq!(self.shape.len(), 2, "row_mut() requires a 2-D tensor");
        let cols = self.shape[1];
        &mut self.data[i * cols..(i + 1) * cols]
    }

    /// Softmax activation
    ///
    /// Computes the numerically stable softmax along the last axis:
    ///
    /// ```text
    /// softmax(x)[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    /// ```
    ///
    /// Every leading index is treated as an independent row, so a
    /// `[batch, time, vocab]` tensor is normalized per `(batch, time)`.
    ///
    /// # Panics
    ///
    /// Only the last axis is supported (`axis` must be `-1` or `ndim - 1`)
    pub fn softmax(&self, axis: isize) -> Tensor {
        let ndim = self.shape.len() as isize;
        let axis_pos = if axis < 0 { ndim + axis } else { axis };
        assert_eq!(
            axis_pos,
            ndim - 1,
            "softmax is only implemented over the last axis"
        );

        let cols = self.last_dim();
        let mut result = self.data.clone();
        result.par_chunks_mut(cols).for_each(softmax_in_place);

        Tensor::new(result, self.shape.clone())
    }

    /// Reshape tensor to new shape
    ///
    /// Total number of elements must remain the same.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use touchstone::Tensor;
    /// let logits = Tensor::zeros(vec![2, 4, 5]);
    /// let flat = logits.reshape(&[8, 5]);
    /// assert_eq!(flat.shape, vec![8, 5]);
    /// ```
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape: element count mismatch"
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }
}

/// Normalize one row into a probability distribution
pub(crate) fn softmax_in_place(row: &mut [f32]) {
    let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let mut sum = 0.0;
    for val in row.iter_mut() {
        *val = (*val - max).exp();
        sum += *val;
    }
    for val in row.iter_mut() {
        *val /= sum;
    }
}
