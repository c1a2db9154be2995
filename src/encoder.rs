//! # Text encoders
//!
//! Both similarity spaces are fed by encoders specified purely as a
//! capability: optionally fit once over a corpus snapshot, then transform a
//! document into a numeric vector. The matrix-maintenance core only ever
//! sees the [`TextEncoder`] trait, never a model runtime.
//!
//! This module holds the trait and the **lexical** encoder, a TF-IDF
//! vectorizer with English stop-word filtering. The semantic encoder (a
//! pretrained BERT model) lives in [`crate::embedding`].
//!
//! ## Vocabulary stability
//! The vocabulary is fitted once over a corpus snapshot and is
//! **append-stable**: new or updated posts are projected into the existing
//! space (unknown terms are dropped, the dimension never grows). Only full
//! reinitialization refits it. This is what keeps incremental matrix patches
//! comparable with the scores already in the matrix.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::EngineResult;

/// Common English stop words, filtered before term counting.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "it", "in", "on", "of", "to", "and", "or", "for", "with", "this",
    "that", "be", "are", "was", "were", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "can", "shall", "not", "no",
    "but", "if", "at", "by", "from", "as", "into", "about", "up", "out", "so", "its", "you",
    "your", "i", "my", "we", "our", "they", "them", "their", "he", "she", "his", "her",
];

/// Capability every text encoder provides: turn a document into a vector.
///
/// The lexical encoder carries fitted state; the semantic encoder is
/// stateless per call. Both are used behind this trait so the change
/// processor and tests are independent of any model runtime.
pub trait TextEncoder {
    /// Encode a document into a fixed-dimension vector.
    fn transform(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Dimensionality of the produced vectors.
    fn dimension(&self) -> usize;
}

/// Fitted TF-IDF vectorizer.
///
/// Produces raw (non-unit) term-frequency × inverse-document-frequency
/// vectors; cosine comparison normalizes inside the metric, so no unit
/// scaling happens here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfIdfEncoder {
    /// term → dimension index
    vocabulary: HashMap<String, usize>,
    /// IDF weight per dimension
    idf: Vec<f32>,
}

impl TfIdfEncoder {
    /// Fit the vocabulary and IDF weights over a corpus snapshot.
    ///
    /// Uses smoothed IDF (`ln((1 + n) / (1 + df)) + 1`) so terms appearing
    /// in every document keep a nonzero weight and empty document
    /// frequencies cannot divide by zero.
    ///
    /// # Parameters
    /// - `documents`: The full corpus text, one entry per post.
    pub fn fit<S: AsRef<str>>(documents: &[S]) -> Self {
        let n = documents.len() as f32;
        let tokenized: Vec<Vec<String>> =
            documents.iter().map(|d| tokenize(d.as_ref())).collect();

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for tokens in &tokenized {
            let unique: HashSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
            for term in unique {
                *doc_freq.entry(term.to_string()).or_insert(0) += 1;
                if !vocabulary.contains_key(term) {
                    let idx = vocabulary.len();
                    vocabulary.insert(term.to_string(), idx);
                }
            }
        }

        let mut idf = vec![0.0f32; vocabulary.len()];
        for (term, &idx) in &vocabulary {
            let df = *doc_freq.get(term).unwrap_or(&0) as f32;
            idf[idx] = ((1.0 + n) / (1.0 + df)).ln() + 1.0;
        }

        Self { vocabulary, idf }
    }

    /// Number of terms in the fitted vocabulary.
    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

impl TextEncoder for TfIdfEncoder {
    /// Project a document into the fitted space.
    ///
    /// Terms outside the fitted vocabulary are dropped; the output dimension
    /// never changes after fitting.
    fn transform(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.idf.len()];
        if vector.is_empty() {
            return Ok(vector);
        }

        let tokens = tokenize(text);
        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        for (term, &count) in &tf {
            if let Some(&idx) = self.vocabulary.get(*term) {
                vector[idx] = count * self.idf[idx];
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.idf.len()
    }
}

/// Lowercase, split on non-alphanumeric boundaries, drop single characters
/// and stop words.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1 && !STOP_WORDS.contains(t))
        .map(|t| t.to_string())
        .collect()
}
