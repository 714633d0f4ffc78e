//! Training Data and Training Loop
//!
//! Everything between "a string of text" and "a trained bigram table":
//! corpus loading, random batch sampling, loss estimation, and the
//! optimization loop itself.
//!
//! ## How Batches Are Sampled
//!
//! Each batch is `batch_size` windows of `block_size` consecutive tokens,
//! each starting at a random offset. The target is always the input shifted
//! by one position:
//!
//! ```text
//! Tokens: [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
//! Block size: 4
//!
//! Offset 2: Input [3, 4, 5, 6]   Target [4, 5, 6, 7]
//! Offset 7: Input [8, 9, 10, 11] Target [9, 10, 11, 12]
//! ```
//!
//! Offsets are drawn uniformly from `[0, len - block_size)` with replacement,
//! so windows may overlap, repeat, or come back in any order.
//!
//! ## Training Rhythm
//!
//! ```text
//! for iter in 0..max_iters:
//!     if iter % eval_interval == 0: estimate train/val loss and report
//!     sample a train batch
//!     forward → zero_grad → backward → optimizer step
//! ```
//!
//! ## Example
//!
//! ```rust
//! use rand::{rngs::StdRng, SeedableRng};
//! use touchstone::{
//!     train, AdamWOptimizer, BigramLanguageModel, CharTokenizer, Dataset, TrainingConfig,
//! };
//!
//! let text = "the cat sat on the mat. ".repeat(40);
//! let tokenizer = CharTokenizer::from_text(&text);
//! let dataset = Dataset::new(tokenizer.encode(&text)?, 0.9);
//!
//! let config = TrainingConfig::tiny();
//! let mut rng = StdRng::seed_from_u64(config.seed);
//! let mut model = BigramLanguageModel::new(tokenizer.vocab_size(), &mut rng);
//! let mut optimizer = AdamWOptimizer::new(&model);
//!
//! let report = train(&mut model, &mut optimizer, &dataset, &config, &mut rng, None)?;
//! assert_eq!(report.evaluations.len(), config.max_iters / config.eval_interval);
//! # Ok::<(), touchstone::TouchstoneError>(())
//! ```

use crate::error::{Result, TouchstoneError};
use crate::model::BigramLanguageModel;
use crate::optimizer::AdamWOptimizer;
use crate::training_logger::{train_val_split, TrainingLogger};
use rand::Rng;
use std::fs;
use std::path::Path;

/// Which half of the corpus to sample from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

/// One batch of input windows and their next-token targets
///
/// Both fields have shape `[batch_size][block_size]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub inputs: Vec<Vec<usize>>,
    pub targets: Vec<Vec<usize>>,
}

/// An encoded corpus split into train and validation token sequences
#[derive(Clone, Debug)]
pub struct Dataset {
    train: Vec<usize>,
    val: Vec<usize>,
}

impl Dataset {
    /// Split `tokens` by index: the first `floor(len * train_fraction)` go
    /// to training, the rest to validation
    ///
    /// # Example
    ///
    /// ```rust
    /// # use touchstone::Dataset;
    /// let dataset = Dataset::new((0..100).collect(), 0.9);
    /// assert_eq!(dataset.train().len(), 90);
    /// assert_eq!(dataset.val()[0], 90);
    /// ```
    pub fn new(tokens: Vec<usize>, train_fraction: f64) -> Self {
        let (train, val) = train_val_split(&tokens, train_fraction);
        Self {
            train: train.to_vec(),
            val: val.to_vec(),
        }
    }

    pub fn train(&self) -> &[usize] {
        &self.train
    }

    pub fn val(&self) -> &[usize] {
        &self.val
    }

    /// Token sequence backing a split
    pub fn split(&self, split: Split) -> &[usize] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
        }
    }

    /// Sample a random batch of windows from one split
    ///
    /// # Errors
    ///
    /// [`TouchstoneError::CorpusTooShort`] if the split has fewer than
    /// `block_size + 1` tokens, and [`TouchstoneError::Config`] for a zero
    /// `batch_size` or `block_size`.
    pub fn get_batch<R: Rng + ?Sized>(
        &self,
        split: Split,
        batch_size: usize,
        block_size: usize,
        rng: &mut R,
    ) -> Result<Batch> {
        if batch_size == 0 || block_size == 0 {
            return Err(TouchstoneError::Config(format!(
                "batch_size ({}) and block_size ({}) must be positive",
                batch_size, block_size
            )));
        }

        let data = self.split(split);
        if data.len() <= block_size {
            return Err(TouchstoneError::CorpusTooShort {
                len: data.len(),
                block_size,
            });
        }

        let mut inputs = Vec::with_capacity(batch_size);
        let mut targets = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            let start = rng.random_range(0..data.len() - block_size);
            inputs.push(data[start..start + block_size].to_vec());
            targets.push(data[start + 1..start + block_size + 1].to_vec());
        }

        Ok(Batch { inputs, targets })
    }
}

/// Read the corpus at `path`, downloading it from `url` first if the file
/// doesn't exist yet
///
/// # Errors
///
/// [`TouchstoneError::Io`] if the file is missing and no URL was given, or it
/// can't be read or written. [`TouchstoneError::Download`] for network
/// failures and non-success HTTP status codes.
pub fn load_corpus<P: AsRef<Path>>(path: P, url: Option<&str>) -> Result<String> {
    let path = path.as_ref();
    if !path.exists() {
        if let Some(url) = url {
            println!("Downloading {} ...", url);
            let text = reqwest::blocking::get(url)?.error_for_status()?.text()?;
            fs::write(path, &text)?;
            println!("Saved {} bytes to {}", text.len(), path.display());
        }
    }
    Ok(fs::read_to_string(path)?)
}

/// Training configuration
///
/// Defaults reproduce the classic bigram run: 3000 iterations of batch 32,
/// block 8, evaluated every 300 iterations.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingConfig {
    /// Number of sequences per batch
    pub batch_size: usize,
    /// Length of each training window
    pub block_size: usize,
    /// Number of optimizer steps
    pub max_iters: usize,
    /// Estimate losses every N iterations
    pub eval_interval: usize,
    /// Learning rate for AdamW
    pub learning_rate: f32,
    /// Batches averaged per split when estimating loss
    pub eval_iters: usize,
    /// Seed for the run's single RNG
    pub seed: u64,
    /// Tokens to sample after training
    pub max_new_tokens: usize,
    /// Fraction of the corpus used for training
    pub train_fraction: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            block_size: 8,
            max_iters: 3000,
            eval_interval: 300,
            learning_rate: 1e-3,
            eval_iters: 200,
            seed: 1337,
            max_new_tokens: 400,
            train_fraction: 0.9,
        }
    }
}

impl TrainingConfig {
    /// Create a tiny configuration for quick experiments and tests
    ///
    /// A higher learning rate than the default so that a few hundred steps
    /// visibly move the loss.
    pub fn tiny() -> Self {
        Self {
            batch_size: 8,
            block_size: 4,
            max_iters: 200,
            eval_interval: 50,
            learning_rate: 5e-2,
            eval_iters: 10,
            seed: 1337,
            max_new_tokens: 50,
            train_fraction: 0.9,
        }
    }

    /// Check that every size and interval is usable
    ///
    /// # Errors
    ///
    /// [`TouchstoneError::Config`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("block_size", self.block_size),
            ("eval_interval", self.eval_interval),
            ("eval_iters", self.eval_iters),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(TouchstoneError::Config(format!("{} must be positive", name)));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TouchstoneError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(TouchstoneError::Config(format!(
                "train_fraction must be in (0, 1), got {}",
                self.train_fraction
            )));
        }
        Ok(())
    }
}

/// Mean loss over `eval_iters` batches of each split
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossEstimate {
    pub train: f32,
    pub val: f32,
}

/// Average the loss over random batches of both splits
///
/// Puts the model in eval mode for the duration and back into train mode
/// afterwards. Gradients are never touched.
///
/// # Errors
///
/// [`TouchstoneError::Config`] if `config` fails validation, and sampling
/// errors from [`Dataset::get_batch`].
pub fn estimate_loss<R: Rng + ?Sized>(
    model: &mut BigramLanguageModel,
    dataset: &Dataset,
    config: &TrainingConfig,
    rng: &mut R,
) -> Result<LossEstimate> {
    config.validate()?;
    model.eval();
    let result = average_losses(model, dataset, config, rng);
    model.train();
    result
}

fn average_losses<R: Rng + ?Sized>(
    model: &BigramLanguageModel,
    dataset: &Dataset,
    config: &TrainingConfig,
    rng: &mut R,
) -> Result<LossEstimate> {
    let mut mean_for = |split: Split| -> Result<f32> {
        let mut total = 0.0;
        for _ in 0..config.eval_iters {
            let batch =
                dataset.get_batch(split, config.batch_size, config.block_size, &mut *rng)?;
            total += model.loss(&batch.inputs, &batch.targets);
        }
        Ok(total / config.eval_iters as f32)
    };

    let train = mean_for(Split::Train)?;
    let val = mean_for(Split::Val)?;
    Ok(LossEstimate { train, val })
}

/// One periodic loss estimate
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub step: usize,
    pub train_loss: f32,
    pub val_loss: f32,
}

/// What a training run produced
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingReport {
    /// Every periodic estimate, in step order
    pub evaluations: Vec<Evaluation>,
    /// Loss of the last training batch, if any step ran
    pub final_loss: Option<f32>,
}

/// Run the training loop
///
/// Prints `step {iter}: train loss {:.4}, val loss {:.4}` at every
/// evaluation and, when a logger is given, appends the same numbers to its
/// CSV.
///
/// # Errors
///
/// Configuration errors from [`TrainingConfig::validate`], sampling errors
/// from [`Dataset::get_batch`], and logger IO errors.
pub fn train<R: Rng + ?Sized>(
    model: &mut BigramLanguageModel,
    optimizer: &mut AdamWOptimizer,
    dataset: &Dataset,
    config: &TrainingConfig,
    rng: &mut R,
    mut logger: Option<&mut TrainingLogger>,
) -> Result<TrainingReport> {
    config.validate()?;
    model.train();

    let mut evaluations = Vec::new();
    let mut final_loss = None;

    for iter in 0..config.max_iters {
        if iter % config.eval_interval == 0 {
            let losses = estimate_loss(model, dataset, config, rng)?;
            println!(
                "step {}: train loss {:.4}, val loss {:.4}",
                iter, losses.train, losses.val
            );
            if let Some(logger) = logger.as_deref_mut() {
                logger.log(iter, config.learning_rate, losses.train, losses.val)?;
            }
            evaluations.push(Evaluation {
                step: iter,
                train_loss: losses.train,
                val_loss: losses.val,
            });
        }

        let batch = dataset.get_batch(Split::Train, config.batch_size, config.block_size, rng)?;
        let (logits, loss) = model.forward(&batch.inputs, Some(&batch.targets[..]));
        model.zero_grad();
        model.backward(&batch.inputs, &logits, &batch.targets);
        optimizer.step(model, config.learning_rate);
        final_loss = loss;
    }

    Ok(TrainingReport {
        evaluations,
        final_loss,
    })
}
