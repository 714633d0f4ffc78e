//! Error Types
//!
//! Every fallible operation in the crate returns [`Result`], which carries a
//! [`TouchstoneError`]. Shape mismatches inside tensor kernels are still
//! assertions: they mean the calling code is wrong, not the input.

use thiserror::Error;

/// Errors produced while loading data, tokenizing, training, or checkpointing
#[derive(Error, Debug)]
pub enum TouchstoneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Character {0:?} is not in the vocabulary")]
    UnknownCharacter(char),

    #[error("Invalid token ID: {0}")]
    InvalidTokenId(usize),

    #[error("Corpus too short: {len} tokens cannot fill a window of {block_size}")]
    CorpusTooShort { len: usize, block_size: usize },

    #[error("Sampling error: {0}")]
    Sampling(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, TouchstoneError>;
