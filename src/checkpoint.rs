//! Model Checkpointing
//!
//! Saves everything needed to resume a run or sample from a trained model:
//! the bigram table, the vocabulary it was trained with, optionally the
//! AdamW moments, and the step count.
//!
//! ## File Format
//!
//! All integers and floats are little-endian.
//!
//! ```text
//! "TOUCHSTONE"                 10-byte magic
//! version: u8                  currently 1
//! tokenizer: u32 len + JSON    sorted character list
//! metadata:  u32 len + JSON    step, last validation loss
//! weights:   tensor            [vocab_size, vocab_size]
//! has_optimizer: u8            0 or 1
//!   step: u64, beta1, beta2, epsilon, weight_decay: f32
//!   m: tensor, v: tensor
//!
//! tensor = ndim: u32, dims: u32 × ndim, len: u32, data: f32 × len
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use rand::{rngs::StdRng, SeedableRng};
//! use touchstone::{BigramLanguageModel, CharTokenizer, Checkpoint};
//!
//! let tokenizer = CharTokenizer::from_text("hello world");
//! let mut rng = StdRng::seed_from_u64(1337);
//! let model = BigramLanguageModel::new(tokenizer.vocab_size(), &mut rng);
//!
//! Checkpoint::inference_only(model, tokenizer).save("bigram.ckpt")?;
//! let restored = Checkpoint::load("bigram.ckpt")?;
//! assert_eq!(restored.tokenizer.vocab_size(), 8);
//! # Ok::<(), touchstone::TouchstoneError>(())
//! ```

use crate::error::{Result, TouchstoneError};
use crate::model::BigramLanguageModel;
use crate::optimizer::AdamWOptimizer;
use crate::tensor::Tensor;
use crate::tokenizer::CharTokenizer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 10] = b"TOUCHSTONE";
const VERSION: u8 = 1;

/// Every stored tensor is a 2-D table
const MAX_NDIM: usize = 2;
/// Elements reserved up front while reading a tensor
const MAX_PREALLOC: usize = 1 << 20;

#[derive(Serialize, Deserialize)]
struct CheckpointMetadata {
    step: usize,
    val_loss: Option<f32>,
}

/// A saved training state
pub struct Checkpoint {
    pub model: BigramLanguageModel,
    pub optimizer: Option<AdamWOptimizer>,
    pub tokenizer: CharTokenizer,
    pub step: usize,
    /// Validation loss at the last evaluation before saving
    pub val_loss: Option<f32>,
}

impl Checkpoint {
    /// Create a checkpoint for sampling only (no optimizer state)
    pub fn inference_only(model: BigramLanguageModel, tokenizer: CharTokenizer) -> Self {
        Self {
            model,
            optimizer: None,
            tokenizer,
            step: 0,
            val_loss: None,
        }
    }

    /// Save checkpoint to file
    ///
    /// # Errors
    ///
    /// [`TouchstoneError::InvalidCheckpoint`] if the tokenizer's vocabulary
    /// doesn't match the model, IO and JSON errors otherwise.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if self.tokenizer.vocab_size() != self.model.vocab_size() {
            return Err(TouchstoneError::InvalidCheckpoint(format!(
                "tokenizer has {} characters but the model expects {}",
                self.tokenizer.vocab_size(),
                self.model.vocab_size()
            )));
        }

        println!("Saving checkpoint to {}...", path.display());
        let mut file = BufWriter::new(File::create(path)?);

        file.write_all(MAGIC)?;
        file.write_all(&[VERSION])?;

        write_bytes(&mut file, self.tokenizer.to_json()?.as_bytes())?;
        let metadata = CheckpointMetadata {
            step: self.step,
            val_loss: self.val_loss,
        };
        write_bytes(&mut file, serde_json::to_string(&metadata)?.as_bytes())?;

        write_tensor(&mut file, self.model.weights())?;

        file.write_all(&[self.optimizer.is_some() as u8])?;
        if let Some(opt) = &self.optimizer {
            file.write_all(&(opt.step as u64).to_le_bytes())?;
            for value in [opt.beta1, opt.beta2, opt.epsilon, opt.weight_decay] {
                file.write_all(&value.to_le_bytes())?;
            }
            write_tensor(&mut file, &opt.m)?;
            write_tensor(&mut file, &opt.v)?;
        }
        file.flush()?;

        let mut includes = vec!["Model weights", "Tokenizer"];
        if self.optimizer.is_some() {
            includes.push("Optimizer state");
        }
        println!("  Includes: {}", includes.join(" + "));
        Ok(())
    }

    /// Load checkpoint from file
    ///
    /// # Errors
    ///
    /// [`TouchstoneError::InvalidCheckpoint`] for a wrong magic header, an
    /// unsupported version, or tensors whose shapes don't fit together.
    /// Truncated files surface as [`TouchstoneError::Io`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        println!("Loading checkpoint from {}...", path.display());
        let mut file = BufReader::new(File::open(path)?);

        let mut header = [0u8; 10];
        file.read_exact(&mut header)?;
        if &header != MAGIC {
            return Err(TouchstoneError::InvalidCheckpoint(
                "expected TOUCHSTONE header".to_string(),
            ));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != VERSION {
            return Err(TouchstoneError::InvalidCheckpoint(format!(
                "unsupported version {}",
                version[0]
            )));
        }

        let tokenizer = CharTokenizer::from_json(&read_string(&mut file)?)?;
        let metadata: CheckpointMetadata = serde_json::from_str(&read_string(&mut file)?)?;

        let vocab_size = tokenizer.vocab_size();
        let expected_shape = vec![vocab_size, vocab_size];
        let weights = read_tensor(&mut file)?;
        check_shape("weights", &weights, &expected_shape)?;
        let model = BigramLanguageModel::with_weights(weights);

        let mut has_optimizer = [0u8; 1];
        file.read_exact(&mut has_optimizer)?;
        let optimizer = match has_optimizer[0] {
            0 => None,
            1 => {
                let mut step_bytes = [0u8; 8];
                file.read_exact(&mut step_bytes)?;
                let step = u64::from_le_bytes(step_bytes) as usize;
                let beta1 = read_f32(&mut file)?;
                let beta2 = read_f32(&mut file)?;
                let epsilon = read_f32(&mut file)?;
                let weight_decay = read_f32(&mut file)?;
                let m = read_tensor(&mut file)?;
                let v = read_tensor(&mut file)?;
                check_shape("optimizer m", &m, &expected_shape)?;
                check_shape("optimizer v", &v, &expected_shape)?;
                Some(AdamWOptimizer {
                    m,
                    v,
                    beta1,
                    beta2,
                    epsilon,
                    weight_decay,
                    step,
                })
            }
            flag => {
                return Err(TouchstoneError::InvalidCheckpoint(format!(
                    "bad optimizer flag {}",
                    flag
                )))
            }
        };

        println!(
            "  Step {}, vocab size {}, {}",
            metadata.step,
            vocab_size,
            if optimizer.is_some() {
                "with optimizer state"
            } else {
                "inference only"
            }
        );

        Ok(Self {
            model,
            optimizer,
            tokenizer,
            step: metadata.step,
            val_loss: metadata.val_loss,
        })
    }
}

fn check_shape(name: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.shape != expected {
        return Err(TouchstoneError::InvalidCheckpoint(format!(
            "{} has shape {:?}, expected {:?}",
            name, tensor.shape, expected
        )));
    }
    Ok(())
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)?;
    Ok(())
}

fn write_tensor<W: Write>(w: &mut W, tensor: &Tensor) -> Result<()> {
    w.write_all(&(tensor.shape.len() as u32).to_le_bytes())?;
    for &dim in &tensor.shape {
        w.write_all(&(dim as u32).to_le_bytes())?;
    }
    w.write_all(&(tensor.data.len() as u32).to_le_bytes())?;
    for &val in &tensor.data {
        w.write_all(&val.to_le_bytes())?;
    }
    Ok(())
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    r.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_f32<R: Read>(r: &mut R) -> Result<f32> {
    let mut bytes = [0u8; 4];
    r.read_exact(&mut bytes)?;
    Ok(f32::from_le_bytes(bytes))
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = read_u32(r)? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| TouchstoneError::InvalidCheckpoint(e.to_string()))
}

fn read_tensor<R: Read>(r: &mut R) -> Result<Tensor> {
    let ndim = read_u32(r)? as usize;
    if ndim > MAX_NDIM {
        return Err(TouchstoneError::InvalidCheckpoint(format!(
            "tensor has {} dimensions, at most {} supported",
            ndim, MAX_NDIM
        )));
    }
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        shape.push(read_u32(r)? as usize);
    }

    let len = read_u32(r)? as usize;
    let expected = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
    if expected != Some(len) {
        return Err(TouchstoneError::InvalidCheckpoint(format!(
            "tensor of shape {:?} cannot hold {} values",
            shape, len
        )));
    }

    // A corrupt length must not reserve memory the file can't back
    let mut data = Vec::with_capacity(len.min(MAX_PREALLOC));
    for _ in 0..len {
        data.push(read_f32(r)?);
    }
    Ok(Tensor::new(data, shape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn trained_pair() -> (BigramLanguageModel, AdamWOptimizer, CharTokenizer) {
        let tokenizer = CharTokenizer::from_text("to be or not to be");
        let mut rng = StdRng::seed_from_u64(1337);
        let mut model = BigramLanguageModel::new(tokenizer.vocab_size(), &mut rng);
        let mut optimizer = AdamWOptimizer::new(&model);

        let inputs = vec![tokenizer.encode("to be or").unwrap()];
        let targets = vec![tokenizer.encode("o be or ").unwrap()];
        for _ in 0..3 {
            let (logits, _) = model.forward(&inputs, Some(&targets[..]));
            model.zero_grad();
            model.backward(&inputs, &logits, &targets);
            optimizer.step(&mut model, 1e-2);
        }
        (model, optimizer, tokenizer)
    }

    #[test]
    fn test_round_trip_with_optimizer() {
        let (model, optimizer, tokenizer) = trained_pair();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("full.ckpt");

        let checkpoint = Checkpoint {
            model: model.clone(),
            optimizer: Some(optimizer.clone()),
            tokenizer: tokenizer.clone(),
            step: 3,
            val_loss: Some(2.5),
        };
        checkpoint.save(&path).unwrap();
        let restored = Checkpoint::load(&path).unwrap();

        assert_eq!(restored.model.weights(), model.weights());
        assert_eq!(restored.tokenizer.chars(), tokenizer.chars());
        assert_eq!(restored.step, 3);
        assert_eq!(restored.val_loss, Some(2.5));

        let opt = restored.optimizer.unwrap();
        assert_eq!(opt.step, 3);
        assert_eq!(opt.m, optimizer.m);
        assert_eq!(opt.v, optimizer.v);
        assert_eq!(opt.weight_decay, optimizer.weight_decay);
    }

    #[test]
    fn test_resumed_training_continues_optimizer_state() {
        use crate::train::{train, Dataset, TrainingConfig};

        let text = "to be or not to be ".repeat(20);
        let tokenizer = CharTokenizer::from_text(&text);
        let dataset = Dataset::new(tokenizer.encode(&text).unwrap(), 0.9);
        let config = TrainingConfig {
            max_iters: 20,
            eval_interval: 10,
            ..TrainingConfig::tiny()
        };
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut model = BigramLanguageModel::new(tokenizer.vocab_size(), &mut rng);
        let mut optimizer = AdamWOptimizer::new(&model);
        train(&mut model, &mut optimizer, &dataset, &config, &mut rng, None).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.ckpt");
        Checkpoint {
            model,
            optimizer: Some(optimizer),
            tokenizer,
            step: config.max_iters,
            val_loss: None,
        }
        .save(&path)
        .unwrap();

        let restored = Checkpoint::load(&path).unwrap();
        let mut model = restored.model;
        let mut optimizer = restored.optimizer.unwrap();
        let before = model.weights().clone();
        train(&mut model, &mut optimizer, &dataset, &config, &mut rng, None).unwrap();

        assert_eq!(optimizer.step_count(), 2 * config.max_iters);
        assert_ne!(model.weights(), &before);
    }

    #[test]
    fn test_inference_only_round_trip() {
        let (model, _, tokenizer) = trained_pair();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infer.ckpt");

        Checkpoint::inference_only(model.clone(), tokenizer)
            .save(&path)
            .unwrap();
        let restored = Checkpoint::load(&path).unwrap();
        assert!(restored.optimizer.is_none());
        assert_eq!(restored.model.weights(), model.weights());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ckpt");
        std::fs::write(&path, b"NOTACHECKPOINT-AT-ALL").unwrap();

        let err = Checkpoint::load(&path).err().unwrap();
        assert!(matches!(err, TouchstoneError::InvalidCheckpoint(_)));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v9.ckpt");
        let mut bytes = MAGIC.to_vec();
        bytes.push(9);
        std::fs::write(&path, bytes).unwrap();

        let err = Checkpoint::load(&path).err().unwrap();
        assert!(matches!(err, TouchstoneError::InvalidCheckpoint(_)));
    }

    #[test]
    fn test_truncated_file_is_io_error() {
        let (model, _, tokenizer) = trained_pair();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.ckpt");
        Checkpoint::inference_only(model, tokenizer)
            .save(&path)
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 10]).unwrap();
        let err = Checkpoint::load(&path).err().unwrap();
        assert!(matches!(err, TouchstoneError::Io(_)));
    }

    /// Valid header, tokenizer and metadata, followed by `tensor_header`
    fn file_with_tensor_header(path: &Path, tensor_header: &[u32]) {
        let tokenizer = CharTokenizer::from_text("ab");
        let mut bytes = MAGIC.to_vec();
        bytes.push(VERSION);
        write_bytes(&mut bytes, tokenizer.to_json().unwrap().as_bytes()).unwrap();
        write_bytes(&mut bytes, br#"{"step":0,"val_loss":null}"#).unwrap();
        for value in tensor_header {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 16]);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_overflowing_shape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overflow.ckpt");
        file_with_tensor_header(&path, &[2, u32::MAX, u32::MAX, 4]);

        let err = Checkpoint::load(&path).err().unwrap();
        assert!(matches!(err, TouchstoneError::InvalidCheckpoint(_)));
    }

    #[test]
    fn test_too_many_dimensions_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ndim.ckpt");
        file_with_tensor_header(&path, &[3, u32::MAX, u32::MAX, u32::MAX, 4]);

        let err = Checkpoint::load(&path).err().unwrap();
        assert!(matches!(err, TouchstoneError::InvalidCheckpoint(_)));

        file_with_tensor_header(&path, &[u32::MAX]);
        let err = Checkpoint::load(&path).err().unwrap();
        assert!(matches!(err, TouchstoneError::InvalidCheckpoint(_)));
    }

    #[test]
    fn test_mismatched_tokenizer_is_rejected() {
        let (model, _, _) = trained_pair();
        let other = CharTokenizer::from_text("xyz");
        let dir = tempfile::tempdir().unwrap();
        let err = Checkpoint::inference_only(model, other)
            .save(dir.path().join("mismatch.ckpt"))
            .unwrap_err();
        assert!(matches!(err, TouchstoneError::InvalidCheckpoint(_)));
    }
}
