//! AdamW Optimizer Implementation
//!
//! AdamW (Adam with decoupled weight decay) for the single parameter of the
//! bigram model, with the same defaults PyTorch's `torch.optim.AdamW` uses.
//!
//! ## Algorithm
//!
//! For each parameter θ with gradient g:
//!
//! ```text
//! θ = θ * (1 - α * λ)              # Weight decay (decoupled)
//! m = β₁ * m + (1 - β₁) * g        # First moment (momentum)
//! v = β₂ * v + (1 - β₂) * g²       # Second moment (variance)
//! m_hat = m / (1 - β₁^t)           # Bias correction
//! v_hat = v / (1 - β₂^t)           # Bias correction
//! θ = θ - α * m_hat / (√v_hat + ε) # Parameter update
//! ```
//!
//! where:
//! - α (lr) = learning rate, passed to each step
//! - λ (weight_decay) = 0.01
//! - β₁ (beta1) = 0.9
//! - β₂ (beta2) = 0.999
//! - ε (epsilon) = 1e-8
//! - t = optimizer step number
//!
//! ## Bias Correction
//!
//! `m` and `v` start at zero, so without the `(1 - β^t)` terms the first
//! updates would be far too small.
//!
//! ## Example
//!
//! ```rust
//! use rand::{rngs::StdRng, SeedableRng};
//! use touchstone::{AdamWOptimizer, BigramLanguageModel};
//!
//! let mut rng = StdRng::seed_from_u64(1337);
//! let mut model = BigramLanguageModel::new(8, &mut rng);
//! let mut optimizer = AdamWOptimizer::new(&model);
//!
//! let inputs = vec![vec![0, 1, 2]];
//! let targets = vec![vec![1, 2, 3]];
//! let (logits, _) = model.forward(&inputs, Some(&targets[..]));
//! model.zero_grad();
//! model.backward(&inputs, &logits, &targets);
//! optimizer.step(&mut model, 1e-3);
//! assert_eq!(optimizer.step_count(), 1);
//! ```
//!
//! ## References
//!
//! - Loshchilov & Hutter (2019): "Decoupled Weight Decay Regularization"
//!   https://arxiv.org/abs/1711.05101
//! - Kingma & Ba (2014): "Adam: A Method for Stochastic Optimization"
//!   https://arxiv.org/abs/1412.6980

use crate::model::BigramLanguageModel;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Elements above which the update runs on the Rayon pool
const PARALLEL_THRESHOLD: usize = 1000;

/// AdamW optimizer state
///
/// `m` and `v` have the same shape as the model's table.
#[derive(Clone, Debug)]
pub struct AdamWOptimizer {
    /// First moment (momentum)
    pub m: Tensor,
    /// Second moment (variance)
    pub v: Tensor,

    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    pub step: usize,
}

impl AdamWOptimizer {
    /// Create a new AdamW optimizer for the given model
    ///
    /// Moments start at zero with β₁=0.9, β₂=0.999, ε=1e-8, λ=0.01.
    pub fn new(model: &BigramLanguageModel) -> Self {
        let shape = model.weights().shape.clone();
        Self {
            m: Tensor::zeros(shape.clone()),
            v: Tensor::zeros(shape),
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.01,
            step: 0,
        }
    }

    /// Override the decoupled weight decay
    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Number of updates applied so far
    pub fn step_count(&self) -> usize {
        self.step
    }

    /// Apply one AdamW update from the model's pending gradient
    ///
    /// Does nothing, and leaves the step counter alone, when the model has no
    /// gradient (for example right after `zero_grad`).
    pub fn step(&mut self, model: &mut BigramLanguageModel, lr: f32) {
        let Some(grad) = model.grad.as_ref() else {
            return;
        };
        assert_eq!(
            grad.shape, self.m.shape,
            "Gradient shape doesn't match optimizer state"
        );

        self.step += 1;
        let step = self.step as f32;

        let bias_correction1 = 1.0 - self.beta1.powf(step);
        let bias_correction2 = 1.0 - self.beta2.powf(step);
        let beta1 = self.beta1;
        let beta2 = self.beta2;
        let epsilon = self.epsilon;
        let decay = 1.0 - lr * self.weight_decay;

        let update = |param: &mut f32, g: f32, m: &mut f32, v: &mut f32| {
            *param *= decay;
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bias_correction1;
            let v_hat = *v / bias_correction2;
            *param -= lr * m_hat / (v_hat.sqrt() + epsilon);
        };

        let params = &mut model.token_embedding_table.data;
        if params.len() > PARALLEL_THRESHOLD {
            params
                .par_iter_mut()
                .zip(grad.data.par_iter())
                .zip(self.m.data.par_iter_mut().zip(self.v.data.par_iter_mut()))
                .for_each(|((p, &g), (m, v))| update(p, g, m, v));
        } else {
            for (((p, &g), m), v) in params
                .iter_mut()
                .zip(&grad.data)
                .zip(self.m.data.iter_mut())
                .zip(self.v.data.iter_mut())
            {
                update(p, g, m, v);
            }
        }
    }
}
