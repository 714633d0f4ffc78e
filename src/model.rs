//! Bigram Language Model
//!
//! The smallest language model that still learns something: one
//! `vocab_size × vocab_size` table where row `i` holds the logits for the
//! character that follows character `i`. There is no context beyond the
//! current token, no hidden state, no position information.
//!
//! ## Architecture
//!
//! ```text
//! Input IDs [B, T]
//!     ↓
//! Table row lookup   logits[b, t, :] = W[idx[b, t], :]
//!     ↓
//! Logits [B, T, V]
//!     ↓ (when targets are given)
//! Cross-entropy averaged over all B*T positions
//! ```
//!
//! ## Gradients
//!
//! Because the forward pass is a pure lookup, the backward pass is a scatter:
//!
//! ```text
//! dL/dlogits[n, :] = (softmax(logits[n, :]) - onehot(target[n])) / (B*T)
//! dL/dW[idx[n], :] += dL/dlogits[n, :]
//! ```
//!
//! The gradient is held on the model between [`backward`] and the optimizer
//! step, and dropped by [`zero_grad`], mirroring the usual
//! "zero, backward, step" training rhythm.
//!
//! [`backward`]: BigramLanguageModel::backward
//! [`zero_grad`]: BigramLanguageModel::zero_grad

use crate::error::{Result, TouchstoneError};
use crate::tensor::{softmax_in_place, Tensor};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;

/// Character-level bigram model
///
/// # Example
///
/// ```rust
/// use rand::{rngs::StdRng, SeedableRng};
/// use touchstone::BigramLanguageModel;
///
/// let mut rng = StdRng::seed_from_u64(1337);
/// let model = BigramLanguageModel::new(65, &mut rng);
///
/// let inputs = vec![vec![0, 1, 2, 3]; 2];
/// let targets = vec![vec![1, 2, 3, 4]; 2];
/// let (logits, loss) = model.forward(&inputs, Some(&targets[..]));
/// assert_eq!(logits.shape, vec![2, 4, 65]);
/// assert!(loss.unwrap() > 0.0);
/// ```
#[derive(Clone, Debug)]
pub struct BigramLanguageModel {
    /// Next-token logits per current token: [vocab_size, vocab_size]
    pub(crate) token_embedding_table: Tensor,
    /// Accumulated gradient of the table, `None` after `zero_grad`
    pub(crate) grad: Option<Tensor>,
    training: bool,
}

impl BigramLanguageModel {
    /// Create a model with the table drawn from `N(0, 1)`
    pub fn new<R: Rng + ?Sized>(vocab_size: usize, rng: &mut R) -> Self {
        let table = Tensor::randn(vec![vocab_size, vocab_size], 1.0, rng);
        Self::with_weights(table)
    }

    /// Wrap an existing table
    ///
    /// # Panics
    ///
    /// Panics unless `table` is a square 2-D tensor
    pub fn with_weights(table: Tensor) -> Self {
        assert!(
            table.shape.len() == 2 && table.shape[0] == table.shape[1],
            "Bigram table must be square, got shape {:?}",
            table.shape
        );
        Self {
            token_embedding_table: table,
            grad: None,
            training: true,
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.token_embedding_table.shape[0]
    }

    pub fn parameter_count(&self) -> usize {
        self.token_embedding_table.data.len()
    }

    /// The learned table
    pub fn weights(&self) -> &Tensor {
        &self.token_embedding_table
    }

    /// The pending gradient, if `backward` ran since the last `zero_grad`
    pub fn grad(&self) -> Option<&Tensor> {
        self.grad.as_ref()
    }

    /// Switch to training mode
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Switch to evaluation mode
    ///
    /// The bigram table behaves identically in both modes; the flag exists so
    /// callers can bracket measurements the same way they would for a model
    /// with dropout.
    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `inputs` - Token ids, shape [B, T]
    /// * `targets` - Optional next-token ids, same shape as `inputs`
    ///
    /// # Returns
    ///
    /// Logits of shape [B, T, V], and the mean cross-entropy over all `B*T`
    /// positions when `targets` is given.
    ///
    /// # Panics
    ///
    /// Panics on ragged or empty batches, on a target shape that differs from
    /// the input shape, and on token ids outside the vocabulary.
    pub fn forward(
        &self,
        inputs: &[Vec<usize>],
        targets: Option<&[Vec<usize>]>,
    ) -> (Tensor, Option<f32>) {
        let logits = self.lookup(inputs);
        let loss = targets.map(|targets| mean_loss(&logits, targets));
        (logits, loss)
    }

    /// Mean cross-entropy of the model on `inputs` against `targets`
    ///
    /// Same number [`forward`](Self::forward) reports when given targets.
    pub fn loss(&self, inputs: &[Vec<usize>], targets: &[Vec<usize>]) -> f32 {
        mean_loss(&self.lookup(inputs), targets)
    }

    /// Table row lookup producing [B, T, V] logits
    fn lookup(&self, inputs: &[Vec<usize>]) -> Tensor {
        let vocab_size = self.vocab_size();
        let batch_size = inputs.len();
        assert!(batch_size > 0, "forward() needs at least one sequence");
        let seq_len = inputs[0].len();

        let mut logits = Vec::with_capacity(batch_size * seq_len * vocab_size);
        for sequence in inputs {
            assert_eq!(sequence.len(), seq_len, "All sequences must share a length");
            for &token_id in sequence {
                assert!(
                    token_id < vocab_size,
                    "Token ID {} out of vocab range (vocab_size = {})",
                    token_id,
                    vocab_size
                );
                logits.extend_from_slice(self.token_embedding_table.row(token_id));
            }
        }
        Tensor::new(logits, vec![batch_size, seq_len, vocab_size])
    }

    /// Drop any accumulated gradient
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }

    /// Backward pass
    ///
    /// Accumulates the gradient of the mean cross-entropy with respect to the
    /// table into the model's gradient buffer. `logits` must be the output of
    /// [`forward`](Self::forward) on the same `inputs`.
    pub fn backward(&mut self, inputs: &[Vec<usize>], logits: &Tensor, targets: &[Vec<usize>]) {
        let vocab_size = self.vocab_size();
        let batch_size = inputs.len();
        let seq_len = inputs.first().map_or(0, Vec::len);
        assert_eq!(
            logits.shape,
            vec![batch_size, seq_len, vocab_size],
            "Logits don't match the input batch"
        );

        let flat_targets = flatten_targets(targets, batch_size, seq_len);
        let n = flat_targets.len() as f32;

        // (softmax - onehot) / N, one row per position
        let mut grad_logits = logits.softmax(-1).reshape(&[batch_size * seq_len, vocab_size]);
        for (pos, &target) in flat_targets.iter().enumerate() {
            let row = grad_logits.row_mut(pos);
            row[target] -= 1.0;
            for g in row.iter_mut() {
                *g /= n;
            }
        }

        let grad = self
            .grad
            .get_or_insert_with(|| Tensor::zeros(vec![vocab_size, vocab_size]));
        for (pos, &token_id) in inputs.iter().flatten().enumerate() {
            let src = grad_logits.row(pos);
            for (dst, &g) in grad.row_mut(token_id).iter_mut().zip(src) {
                *dst += g;
            }
        }
    }

    /// Autoregressive sampling
    ///
    /// Extends every sequence in `context` by `max_new_tokens` ids. Each step
    /// reads the logits for the last token only, turns them into
    /// probabilities with softmax, and draws one id from that distribution.
    ///
    /// # Errors
    ///
    /// [`TouchstoneError::Config`] if a context sequence is empty,
    /// [`TouchstoneError::InvalidTokenId`] for ids outside the vocabulary.
    ///
    /// # Example
    ///
    /// ```rust
    /// use rand::{rngs::StdRng, SeedableRng};
    /// use touchstone::BigramLanguageModel;
    ///
    /// let mut rng = StdRng::seed_from_u64(1337);
    /// let model = BigramLanguageModel::new(10, &mut rng);
    /// let out = model.generate(&[vec![0]], 20, &mut rng).unwrap();
    /// assert_eq!(out[0].len(), 21);
    /// ```
    pub fn generate<R: Rng + ?Sized>(
        &self,
        context: &[Vec<usize>],
        max_new_tokens: usize,
        rng: &mut R,
    ) -> Result<Vec<Vec<usize>>> {
        let vocab_size = self.vocab_size();
        let mut sequences = context.to_vec();

        for sequence in &sequences {
            if sequence.is_empty() {
                return Err(TouchstoneError::Config(
                    "generation context must contain at least one token".to_string(),
                ));
            }
            if let Some(&bad) = sequence.iter().find(|&&id| id >= vocab_size) {
                return Err(TouchstoneError::InvalidTokenId(bad));
            }
        }

        let mut probs = vec![0.0f32; vocab_size];
        for _ in 0..max_new_tokens {
            for sequence in sequences.iter_mut() {
                let last = sequence[sequence.len() - 1];
                probs.copy_from_slice(self.token_embedding_table.row(last));
                softmax_in_place(&mut probs);

                let dist = WeightedIndex::new(&probs)
                    .map_err(|e| TouchstoneError::Sampling(e.to_string()))?;
                sequence.push(dist.sample(rng));
            }
        }

        Ok(sequences)
    }
}

/// Cross-entropy of [B, T, V] logits against [B, T] targets
fn mean_loss(logits: &Tensor, targets: &[Vec<usize>]) -> f32 {
    let (batch_size, seq_len, vocab_size) = (logits.shape[0], logits.shape[1], logits.shape[2]);
    let flat_targets = flatten_targets(targets, batch_size, seq_len);
    cross_entropy(&logits.reshape(&[batch_size * seq_len, vocab_size]), &flat_targets)
}

/// Flatten [B, T] targets to B*T, checking shape and range
fn flatten_targets(targets: &[Vec<usize>], batch_size: usize, seq_len: usize) -> Vec<usize> {
    assert_eq!(targets.len(), batch_size, "Targets batch size mismatch");
    targets
        .iter()
        .inspect(|t| assert_eq!(t.len(), seq_len, "Targets sequence length mismatch"))
        .flatten()
        .copied()
        .collect()
}

/// Mean cross-entropy of `logits` [N, V] against `targets` [N]
///
/// Computed as `logsumexp(row) - row[target]` with the row max subtracted
/// first, so large logits don't overflow.
pub fn cross_entropy(logits: &Tensor, targets: &[usize]) -> f32 {
    assert_eq!(logits.shape.len(), 2, "cross_entropy expects [N, V] logits");
    assert_eq!(logits.shape[0], targets.len(), "One target per logits row");
    let vocab_size = logits.shape[1];

    let mut total_loss = 0.0;
    for (i, &target) in targets.iter().enumerate() {
        assert!(
            target < vocab_size,
            "Target {} out of vocab range (vocab_size = {})",
            target,
            vocab_size
        );
        let row = logits.row(i);
        let max_logit = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let exp_sum: f32 = row.iter().map(|&x| (x - max_logit).exp()).sum();
        total_loss += exp_sum.ln() - (row[target] - max_logit);
    }

    total_loss / targets.len() as f32
}
