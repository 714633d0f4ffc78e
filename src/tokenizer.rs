//! Character-Level Tokenizer
//!
//! The vocabulary is simply every distinct character in the corpus, sorted,
//! with ids assigned in that order. For Shakespeare-like English text that
//! comes to around 65 symbols.
//!
//! ## Example
//!
//! ```rust
//! use touchstone::CharTokenizer;
//!
//! let tokenizer = CharTokenizer::from_text("hello world");
//! assert_eq!(tokenizer.chars(), " dehlorw");
//! assert_eq!(tokenizer.vocab_size(), 8);
//!
//! let ids = tokenizer.encode("hello").unwrap();
//! assert_eq!(ids, vec![3, 2, 4, 4, 5]);
//! assert_eq!(tokenizer.decode(&ids).unwrap(), "hello");
//! ```
//!
//! ## Why Sorted Order?
//!
//! Sorting makes the id assignment a pure function of the character set, so
//! two runs over the same corpus always agree on ids, and a checkpoint only
//! has to store the charset to rebuild the whole mapping.

use crate::error::{Result, TouchstoneError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Bijection between corpus characters and `[0, vocab_size)`
#[derive(Clone, Debug)]
pub struct CharTokenizer {
    /// Character to id
    stoi: HashMap<char, usize>,
    /// Id to character (sorted)
    itos: Vec<char>,
}

/// On-disk form: just the sorted charset
#[derive(Serialize, Deserialize)]
struct Vocabulary {
    chars: Vec<char>,
}

impl CharTokenizer {
    /// Build the vocabulary from every distinct character in `text`
    pub fn from_text(text: &str) -> Self {
        let mut chars: Vec<char> = text.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        Self::from_sorted_chars(chars)
    }

    fn from_sorted_chars(itos: Vec<char>) -> Self {
        let stoi = itos.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self { stoi, itos }
    }

    /// Number of distinct characters
    pub fn vocab_size(&self) -> usize {
        self.itos.len()
    }

    /// The vocabulary as a string, in id order
    pub fn chars(&self) -> String {
        self.itos.iter().collect()
    }

    /// Map a string to token ids
    ///
    /// # Errors
    ///
    /// [`TouchstoneError::UnknownCharacter`] for any character outside the
    /// vocabulary. There is no unknown-token fallback.
    pub fn encode(&self, text: &str) -> Result<Vec<usize>> {
        text.chars()
            .map(|c| {
                self.stoi
                    .get(&c)
                    .copied()
                    .ok_or(TouchstoneError::UnknownCharacter(c))
            })
            .collect()
    }

    /// Map token ids back to a string
    ///
    /// # Errors
    ///
    /// [`TouchstoneError::InvalidTokenId`] for any id `>= vocab_size`
    pub fn decode(&self, ids: &[usize]) -> Result<String> {
        ids.iter()
            .map(|&id| {
                self.itos
                    .get(id)
                    .copied()
                    .ok_or(TouchstoneError::InvalidTokenId(id))
            })
            .collect()
    }

    /// Serialize the vocabulary to JSON
    pub fn to_json(&self) -> Result<String> {
        let vocab = Vocabulary {
            chars: self.itos.clone(),
        };
        Ok(serde_json::to_string(&vocab)?)
    }

    /// Rebuild a tokenizer from [`to_json`](Self::to_json) output
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, or if the stored charset is not strictly
    /// sorted (which would break the id assignment).
    pub fn from_json(json: &str) -> Result<Self> {
        let vocab: Vocabulary = serde_json::from_str(json)?;
        if vocab.chars.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TouchstoneError::Config(
                "vocabulary must be strictly sorted with no duplicates".to_string(),
            ));
        }
        Ok(Self::from_sorted_chars(vocab.chars))
    }

    /// Save tokenizer to a JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load tokenizer from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = "First Citizen:\nBefore we proceed any further, hear me speak.\n\nAll:\nSpeak, speak.";

    #[test]
    fn test_ids_follow_sorted_order() {
        let tokenizer = CharTokenizer::from_text("cab");
        assert_eq!(tokenizer.encode("abc").unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_every_char_roundtrips() {
        let tokenizer = CharTokenizer::from_text(CORPUS);
        for c in CORPUS.chars() {
            let ids = tokenizer.encode(&c.to_string()).unwrap();
            assert_eq!(ids.len(), 1);
            assert!(ids[0] < tokenizer.vocab_size());
            assert_eq!(tokenizer.decode(&ids).unwrap(), c.to_string());
        }
    }

    #[test]
    fn test_mapping_is_bijection() {
        let tokenizer = CharTokenizer::from_text(CORPUS);
        let all_ids: Vec<usize> = (0..tokenizer.vocab_size()).collect();
        let decoded = tokenizer.decode(&all_ids).unwrap();
        assert_eq!(decoded, tokenizer.chars());
        assert_eq!(tokenizer.encode(&decoded).unwrap(), all_ids);
    }

    #[test]
    fn test_encode_decode_identity_on_corpus_strings() {
        let tokenizer = CharTokenizer::from_text(CORPUS);
        let test_cases = ["hear me", "Speak, speak.", "\n\n", "", "All: Citizen"];

        for text in test_cases {
            let encoded = tokenizer.encode(text).unwrap();
            let decoded = tokenizer.decode(&encoded).unwrap();
            assert_eq!(decoded, text, "Failed roundtrip for: {:?}", text);
        }
    }

    #[test]
    fn test_multibyte_characters() {
        let tokenizer = CharTokenizer::from_text("café naïve 日本");
        let encoded = tokenizer.encode("日本 café").unwrap();
        assert_eq!(tokenizer.decode(&encoded).unwrap(), "日本 café");
    }

    #[test]
    fn test_unknown_character() {
        let tokenizer = CharTokenizer::from_text("abc");
        match tokenizer.encode("abz") {
            Err(TouchstoneError::UnknownCharacter('z')) => {}
            other => panic!("expected UnknownCharacter, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_token_id() {
        let tokenizer = CharTokenizer::from_text("abc");
        assert!(matches!(
            tokenizer.decode(&[0, 3]),
            Err(TouchstoneError::InvalidTokenId(3))
        ));
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");

        let tokenizer = CharTokenizer::from_text(CORPUS);
        tokenizer.save(&path).unwrap();
        let loaded = CharTokenizer::load(&path).unwrap();

        assert_eq!(loaded.chars(), tokenizer.chars());
        assert_eq!(
            loaded.encode("hear me").unwrap(),
            tokenizer.encode("hear me").unwrap()
        );
    }

    #[test]
    fn test_from_json_rejects_unsorted() {
        assert!(matches!(
            CharTokenizer::from_json(r#"{"chars":["b","a"]}"#),
            Err(TouchstoneError::Config(_))
        ));
    }
}
