//! Training Logger and Data Splitting
//!
//! This module tracks loss estimates over a training run and splits the
//! encoded corpus into training and validation halves.
//!
//! ## Components
//!
//! - **TrainingLogger**: Logs loss estimates to CSV and console with timestamps
//! - **train_val_split**: Splits tokenized data into training and validation sets
//!
//! ## CSV Format
//!
//! The logger writes CSV files with the following columns:
//! - `step`: Training iteration at which the estimate was taken
//! - `elapsed_seconds`: Time since training started
//! - `learning_rate`: Optimizer learning rate
//! - `train_loss`: Mean cross-entropy over sampled training batches
//! - `val_loss`: Mean cross-entropy over sampled validation batches
//! - `train_perplexity`: exp(train_loss)
//! - `val_perplexity`: exp(val_loss)
//!
//! ## Perplexity
//!
//! For a character model, perplexity reads as "how many characters the model
//! is still choosing between". An untrained model over 65 characters sits near
//! 65; a well-trained bigram model on English lands around 12.

use crate::error::Result;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

/// Training logger for tracking loss estimates over time
///
/// # Example
///
/// ```rust,no_run
/// # use touchstone::TrainingLogger;
/// let mut logger = TrainingLogger::new("training_log.csv")?;
/// logger.log(300, 1e-3, 2.61, 2.64)?;
/// # Ok::<(), touchstone::TouchstoneError>(())
/// ```
pub struct TrainingLogger {
    log_file: File,
    start_time: Instant,
    last_log_time: Instant,
}

impl TrainingLogger {
    /// Create the CSV file, write the header and start the clock
    pub fn new<P: AsRef<Path>>(log_path: P) -> Result<Self> {
        let mut log_file = File::create(log_path)?;

        writeln!(
            log_file,
            "step,elapsed_seconds,learning_rate,train_loss,val_loss,train_perplexity,val_perplexity"
        )?;

        let now = Instant::now();
        Ok(Self {
            log_file,
            start_time: now,
            last_log_time: now,
        })
    }

    /// Log one loss estimate
    ///
    /// Appends a CSV row, flushes it, and prints timing to the console.
    pub fn log(
        &mut self,
        step: usize,
        learning_rate: f32,
        train_loss: f32,
        val_loss: f32,
    ) -> Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f32();
        let train_perplexity = train_loss.exp();
        let val_perplexity = val_loss.exp();

        writeln!(
            self.log_file,
            "{},{:.2},{:.6},{:.4},{:.4},{:.2},{:.2}",
            step,
            elapsed,
            learning_rate,
            train_loss,
            val_loss,
            train_perplexity,
            val_perplexity
        )?;

        // Flush so a crashed run still leaves its history on disk
        self.log_file.flush()?;

        let step_time = self.last_log_time.elapsed().as_secs_f32();
        println!(
            "    Time: {:7.1}s (+{:.1}s) | LR: {:.6} | Perplexity: train {:.2}, val {:.2}",
            elapsed, step_time, learning_rate, train_perplexity, val_perplexity
        );

        self.last_log_time = Instant::now();
        Ok(())
    }
}

/// Split tokenized data into training and validation sets
///
/// The first `floor(train_fraction * len)` tokens train; the remainder
/// validates. Taking validation from the end keeps the two halves from
/// overlapping in sequential text.
///
/// # Example
///
/// ```rust
/// # use touchstone::train_val_split;
/// let tokens: Vec<usize> = (0..10).collect();
/// let (train, val) = train_val_split(&tokens, 0.9);
/// assert_eq!(train.len(), 9);
/// assert_eq!(val, &[9]);
/// ```
pub fn train_val_split(tokens: &[usize], train_fraction: f64) -> (&[usize], &[usize]) {
    let split_idx = ((tokens.len() as f64) * train_fraction) as usize;
    let split_idx = split_idx.min(tokens.len());
    tokens.split_at(split_idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ninety_ten() {
        let tokens: Vec<usize> = (0..1000).collect();
        let (train, val) = train_val_split(&tokens, 0.9);
        assert_eq!(train.len(), 900);
        assert_eq!(val.len(), 100);
        assert_eq!(val[0], 900);
    }

    #[test]
    fn test_split_floors() {
        let tokens: Vec<usize> = (0..15).collect();
        let (train, val) = train_val_split(&tokens, 0.9);
        assert_eq!(train.len(), 13);
        assert_eq!(val.len(), 2);
    }

    #[test]
    fn test_logger_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");

        let mut logger = TrainingLogger::new(&path).unwrap();
        logger.log(0, 1e-3, 4.5, 4.6).unwrap();
        logger.log(300, 1e-3, 2.5, 2.6).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("step,elapsed_seconds"));
        assert!(lines[2].starts_with("300,"));
        assert!(lines[2].contains(",2.5000,2.6000,"));
    }
}
