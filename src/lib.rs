//! Touchstone: Character-Level Bigram Language Model
//!
//! The smallest useful language model, built from scratch in Rust: a
//! `vocab_size × vocab_size` table that predicts the next character from the
//! current one, trained with hand-written cross-entropy gradients and AdamW.
//!
//! # Modules
//!
//! - [`tensor`] - Minimal row-major `f32` tensor
//! - [`tokenizer`] - Sorted character vocabulary, encode/decode
//! - [`train`] - Corpus loading, batch sampling, loss estimation, training loop
//! - [`model`] - The bigram model: forward, backward, generate
//! - [`optimizer`] - AdamW with decoupled weight decay
//! - [`training_logger`] - CSV training log and train/val split
//! - [`checkpoint`] - Binary save/load of a training run
//!
//! # Example
//!
//! ```rust,no_run
//! use rand::{rngs::StdRng, SeedableRng};
//! use touchstone::{
//!     load_corpus, train, AdamWOptimizer, BigramLanguageModel, CharTokenizer, Dataset,
//!     TrainingConfig,
//! };
//!
//! let text = load_corpus("merged_text1.txt", None)?;
//! let tokenizer = CharTokenizer::from_text(&text);
//!
//! let config = TrainingConfig::default();
//! let dataset = Dataset::new(tokenizer.encode(&text)?, config.train_fraction);
//! let mut rng = StdRng::seed_from_u64(config.seed);
//! let mut model = BigramLanguageModel::new(tokenizer.vocab_size(), &mut rng);
//! let mut optimizer = AdamWOptimizer::new(&model);
//!
//! train(&mut model, &mut optimizer, &dataset, &config, &mut rng, None)?;
//!
//! let out = model.generate(&[vec![0]], config.max_new_tokens, &mut rng)?;
//! println!("{}", tokenizer.decode(&out[0])?);
//! # Ok::<(), touchstone::TouchstoneError>(())
//! ```

pub mod checkpoint;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod tensor;
pub mod tokenizer;
pub mod train;
pub mod training_logger;

// Re-export main types for convenience
pub use checkpoint::Checkpoint;
pub use error::{Result, TouchstoneError};
pub use model::{cross_entropy, BigramLanguageModel};
pub use optimizer::AdamWOptimizer;
pub use tensor::Tensor;
pub use tokenizer::CharTokenizer;
pub use train::{
    estimate_loss, load_corpus, train, Batch, Dataset, Evaluation, LossEstimate, Split,
    TrainingConfig, TrainingReport,
};
pub use training_logger::{train_val_split, TrainingLogger};
