//! # Vector sets and similarity matrices
//!
//! Two ID-indexed stores back each similarity space:
//!
//! - [`VectorSet`]: the raw per-post vectors, row-aligned with the corpus
//!   snapshot. This is the reference every incremental patch computes
//!   against.
//! - [`SimilarityMatrix`]: a square, symmetric matrix of pairwise cosine
//!   scores, indexed by post ID on both axes.
//!
//! The maintenance contract is O(k·n) per change batch: [`upsert_rows`]
//! computes cosine between each new/updated vector and **all** current
//! vectors, then writes both the row and the column explicitly. Symmetry is
//! maintained by that dual write, not derived, so a partially written matrix
//! is still queryable. [`drop_ids`] is a pure set-difference: removal never
//! triggers recomputation.
//!
//! The row-ID set must equal the live corpus ID set after every completed
//! change batch; [`SimilarityMatrix::align`] checks that invariant and every
//! patch operation is expected to be guarded by it. A divergence here is the
//! single most consequence-prone failure in the system because it silently
//! reassigns scores to the wrong posts.
//!
//! [`upsert_rows`]: SimilarityMatrix::upsert_rows
//! [`drop_ids`]: SimilarityMatrix::drop_ids

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::state::{read_bincode, write_bincode};

/// Cosine similarity of two raw vectors, normalized inside the comparison.
///
/// Returns 0.0 when either vector has zero magnitude (e.g. a post whose
/// terms all fall outside the fitted vocabulary).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Dense per-post vectors, row-aligned with the corpus snapshot order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorSet {
    ids: Vec<String>,
    rows: Vec<Vec<f32>>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl VectorSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row order of the stored IDs.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Whether a vector is stored for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The stored vector for `id`, if present.
    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.index.get(id).map(|&i| self.rows[i].as_slice())
    }

    /// Append a vector for a new ID, or overwrite the existing row in place.
    ///
    /// Overwriting keeps the row position, so corpus-order alignment is
    /// preserved across updates.
    pub fn upsert(&mut self, id: &str, vector: Vec<f32>) {
        match self.index.get(id) {
            Some(&i) => self.rows[i] = vector,
            None => {
                self.index.insert(id.to_string(), self.ids.len());
                self.ids.push(id.to_string());
                self.rows.push(vector);
            }
        }
    }

    /// Remove the vectors for the given IDs, keeping the relative order of
    /// the survivors. Unknown IDs are ignored.
    pub fn remove_ids(&mut self, ids: &HashSet<String>) {
        let mut kept_ids = Vec::with_capacity(self.ids.len());
        let mut kept_rows = Vec::with_capacity(self.rows.len());
        for (id, row) in self.ids.drain(..).zip(self.rows.drain(..)) {
            if !ids.contains(&id) {
                kept_ids.push(id);
                kept_rows.push(row);
            }
        }
        self.ids = kept_ids;
        self.rows = kept_rows;
        self.rebuild_index();
    }

    /// Iterate `(id, vector)` pairs in row order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.ids
            .iter()
            .zip(self.rows.iter())
            .map(|(id, row)| (id.as_str(), row.as_slice()))
    }

    /// Persist with bincode.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        write_bincode(self, path)
    }

    /// Reload from bincode, rebuilding the in-memory index.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let mut set: Self = read_bincode(path)?;
        set.rebuild_index();
        Ok(set)
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
    }
}

/// Square, symmetric, ID-indexed matrix of pairwise similarity scores.
///
/// The diagonal is stored (it falls out of the pairwise computation) but
/// never consulted: neighbor selection always excludes the subject itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    ids: Vec<String>,
    data: Vec<Vec<f32>>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl SimilarityMatrix {
    /// Create an empty matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the full pairwise matrix from scratch.
    ///
    /// O(n²); used only by full initialization, never by incremental passes.
    pub fn from_vectors(vectors: &VectorSet) -> Self {
        let rows: Vec<Vec<f32>> = vectors
            .rows
            .par_iter()
            .map(|a| vectors.rows.iter().map(|b| cosine_similarity(a, b)).collect())
            .collect();
        let mut matrix = Self {
            ids: vectors.ids.clone(),
            data: rows,
            index: HashMap::new(),
        };
        matrix.rebuild_index();
        matrix
    }

    /// Number of rows (== columns).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the matrix is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row/column IDs in storage order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Whether `id` has a row in the matrix.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The score at `(a, b)`, if both IDs are present.
    pub fn get(&self, a: &str, b: &str) -> Option<f32> {
        let i = *self.index.get(a)?;
        let j = *self.index.get(b)?;
        Some(self.data[i][j])
    }

    /// The full row for `id` as `(other_id, score)` pairs (self included;
    /// callers exclude it during neighbor selection).
    pub fn get_row(&self, id: &str) -> Option<Vec<(String, f32)>> {
        let i = *self.index.get(id)?;
        Some(
            self.ids
                .iter()
                .cloned()
                .zip(self.data[i].iter().copied())
                .collect(),
        )
    }

    /// Check that the row-ID set equals `expected` exactly.
    ///
    /// # Errors
    /// `EngineError::Alignment` naming the missing/extra IDs. Callers must
    /// treat this as fatal for the current pass: patching a misaligned
    /// matrix corrupts the ID↔row mapping.
    pub fn align(&self, expected: &HashSet<String>) -> EngineResult<()> {
        let actual: HashSet<String> = self.ids.iter().cloned().collect();
        if actual == *expected {
            return Ok(());
        }
        let mut missing: Vec<&String> = expected.difference(&actual).collect();
        let mut extra: Vec<&String> = actual.difference(expected).collect();
        missing.sort();
        extra.sort();
        Err(EngineError::Alignment(format!(
            "matrix rows diverge from corpus (missing: {missing:?}, extra: {extra:?})"
        )))
    }

    /// Patch the matrix with new or updated rows.
    ///
    /// For each `(id, vector)` pair, computes cosine similarity against
    /// **all** vectors in `reference` (old and new) and writes both
    /// `matrix[id, *]` and `matrix[*, id]`. IDs not yet present are
    /// appended; IDs already present have their row and column overwritten.
    /// Scores between untouched rows are not recomputed.
    ///
    /// O(k·n) for k patched rows against n reference rows.
    ///
    /// # Errors
    /// `EngineError::Alignment` if a patched ID has no vector in
    /// `reference`, i.e. the caller patched the matrix before the vector
    /// store.
    pub fn upsert_rows(
        &mut self,
        ids: &[String],
        vectors: &[Vec<f32>],
        reference: &VectorSet,
    ) -> EngineResult<()> {
        for id in ids {
            if !reference.contains(id) {
                return Err(EngineError::Alignment(format!(
                    "vector set has no row for patched id {id:?}"
                )));
            }
        }

        // Grow to the reference ID set before writing, appending zero-filled
        // rows/columns for IDs the matrix has not seen yet.
        for id in reference.ids() {
            if !self.index.contains_key(id) {
                self.append_empty(id);
            }
        }

        let sims: Vec<Vec<f32>> = vectors
            .par_iter()
            .map(|v| {
                reference
                    .iter()
                    .map(|(_, other)| cosine_similarity(v, other))
                    .collect()
            })
            .collect();

        for (id, row) in ids.iter().zip(sims) {
            let i = self.index[id];
            for (other_id, score) in reference.ids().iter().zip(row) {
                let j = self.index[other_id];
                self.data[i][j] = score;
                self.data[j][i] = score;
            }
        }
        Ok(())
    }

    /// Remove the rows and columns for the given IDs. Unknown IDs are
    /// ignored. Pure removal: no score is recomputed.
    pub fn drop_ids(&mut self, ids: &HashSet<String>) {
        let keep: Vec<usize> = (0..self.ids.len())
            .filter(|&i| !ids.contains(&self.ids[i]))
            .collect();
        self.ids = keep.iter().map(|&i| self.ids[i].clone()).collect();
        self.data = keep
            .iter()
            .map(|&i| keep.iter().map(|&j| self.data[i][j]).collect())
            .collect();
        self.rebuild_index();
    }

    /// Global minimum and maximum over every stored score.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut it = self.data.iter().flatten().copied();
        let first = it.next()?;
        let mut min = first;
        let mut max = first;
        for v in it {
            min = min.min(v);
            max = max.max(v);
        }
        Some((min, max))
    }

    /// Apply `f` to every score in the matrix.
    pub fn apply_all(&mut self, f: impl Fn(f32) -> f32) {
        for row in &mut self.data {
            for v in row.iter_mut() {
                *v = f(*v);
            }
        }
    }

    /// Apply `f` exactly once to every cell whose row **or** column is in
    /// `ids`. Cells in the intersection (both row and column named) are
    /// still transformed only once.
    pub fn apply_rows(&mut self, ids: &HashSet<String>, f: impl Fn(f32) -> f32) {
        let marked: Vec<bool> = self.ids.iter().map(|id| ids.contains(id)).collect();
        for (i, row) in self.data.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                if marked[i] || marked[j] {
                    *v = f(*v);
                }
            }
        }
    }

    /// Persist with bincode.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        write_bincode(self, path)
    }

    /// Reload from bincode, rebuilding the in-memory index.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let mut matrix: Self = read_bincode(path)?;
        matrix.rebuild_index();
        Ok(matrix)
    }

    fn append_empty(&mut self, id: &str) {
        let n = self.ids.len();
        self.index.insert(id.to_string(), n);
        self.ids.push(id.to_string());
        for row in &mut self.data {
            row.push(0.0);
        }
        self.data.push(vec![0.0; n + 1]);
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vector_set(entries: &[(&str, Vec<f32>)]) -> VectorSet {
        let mut set = VectorSet::new();
        for (id, v) in entries {
            set.upsert(id, v.clone());
        }
        set
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn upsert_maintains_symmetry() {
        let vectors = vector_set(&[
            ("a", vec![1.0, 0.0, 0.0]),
            ("b", vec![1.0, 1.0, 0.0]),
            ("c", vec![0.0, 0.0, 1.0]),
        ]);
        let mut matrix = SimilarityMatrix::new();
        let ids: Vec<String> = vectors.ids().to_vec();
        let rows: Vec<Vec<f32>> = ids.iter().map(|i| vectors.get(i).unwrap().to_vec()).collect();
        matrix.upsert_rows(&ids, &rows, &vectors).unwrap();

        for p in vectors.ids() {
            for q in vectors.ids() {
                assert_eq!(matrix.get(p, q), matrix.get(q, p), "{p} vs {q}");
            }
        }
    }

    #[test]
    fn upsert_leaves_untouched_scores_bit_for_bit() {
        let mut vectors = vector_set(&[
            ("a", vec![1.0, 0.3, 0.0]),
            ("b", vec![0.9, 1.0, 0.0]),
            ("c", vec![0.0, 0.1, 1.0]),
        ]);
        let ids: Vec<String> = vectors.ids().to_vec();
        let rows: Vec<Vec<f32>> = ids.iter().map(|i| vectors.get(i).unwrap().to_vec()).collect();
        let mut matrix = SimilarityMatrix::new();
        matrix.upsert_rows(&ids, &rows, &vectors).unwrap();

        let before_ab = matrix.get("a", "b").unwrap();
        let before_ac = matrix.get("a", "c").unwrap();
        let before_bc = matrix.get("b", "c").unwrap();

        vectors.upsert("d", vec![0.5, 0.5, 0.5]);
        matrix
            .upsert_rows(&["d".to_string()], &[vec![0.5, 0.5, 0.5]], &vectors)
            .unwrap();

        assert_eq!(matrix.get("a", "b").unwrap().to_bits(), before_ab.to_bits());
        assert_eq!(matrix.get("a", "c").unwrap().to_bits(), before_ac.to_bits());
        assert_eq!(matrix.get("b", "c").unwrap().to_bits(), before_bc.to_bits());
        assert!(matrix.get("d", "a").is_some());
        assert_eq!(matrix.get("d", "a"), matrix.get("a", "d"));
    }

    #[test]
    fn upsert_overwrites_existing_rows() {
        let mut vectors = vector_set(&[("a", vec![1.0, 0.0]), ("b", vec![0.0, 1.0])]);
        let ids: Vec<String> = vectors.ids().to_vec();
        let rows: Vec<Vec<f32>> = ids.iter().map(|i| vectors.get(i).unwrap().to_vec()).collect();
        let mut matrix = SimilarityMatrix::new();
        matrix.upsert_rows(&ids, &rows, &vectors).unwrap();
        assert_eq!(matrix.get("a", "b"), Some(0.0));

        // "a" now points the same way as "b".
        vectors.upsert("a", vec![0.0, 2.0]);
        matrix
            .upsert_rows(&["a".to_string()], &[vec![0.0, 2.0]], &vectors)
            .unwrap();
        assert!((matrix.get("a", "b").unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(matrix.len(), 2);
    }

    #[test]
    fn drop_is_pure_removal() {
        let vectors = vector_set(&[
            ("a", vec![1.0, 0.0]),
            ("b", vec![1.0, 1.0]),
            ("c", vec![0.0, 1.0]),
        ]);
        let mut matrix = SimilarityMatrix::from_vectors(&vectors);
        let before_ac = matrix.get("a", "c").unwrap();

        matrix.drop_ids(&HashSet::from(["b".to_string()]));
        assert!(!matrix.contains("b"));
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix.get("a", "c").unwrap().to_bits(), before_ac.to_bits());
    }

    #[test]
    fn align_reports_missing_and_extra_ids() {
        let vectors = vector_set(&[("a", vec![1.0]), ("b", vec![0.5])]);
        let matrix = SimilarityMatrix::from_vectors(&vectors);

        let live = HashSet::from(["a".to_string(), "b".to_string()]);
        assert!(matrix.align(&live).is_ok());

        let diverged = HashSet::from(["a".to_string(), "c".to_string()]);
        let err = matrix.align(&diverged).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"c\""), "missing id not reported: {msg}");
        assert!(msg.contains("\"b\""), "extra id not reported: {msg}");
    }

    #[test]
    fn upsert_requires_vectors_for_patched_ids() {
        let vectors = vector_set(&[("a", vec![1.0])]);
        let mut matrix = SimilarityMatrix::new();
        let err = matrix
            .upsert_rows(&["ghost".to_string()], &[vec![1.0]], &vectors)
            .unwrap_err();
        assert!(matches!(err, EngineError::Alignment(_)));
    }

    #[test]
    fn apply_rows_touches_intersection_cells_once() {
        let vectors = vector_set(&[("a", vec![1.0, 0.0]), ("b", vec![1.0, 1.0])]);
        let mut matrix = SimilarityMatrix::from_vectors(&vectors);
        let raw_ab = matrix.get("a", "b").unwrap();
        let raw_aa = matrix.get("a", "a").unwrap();

        matrix.apply_rows(&HashSet::from(["a".to_string()]), |v| v + 10.0);
        assert_eq!(matrix.get("a", "b").unwrap(), raw_ab + 10.0);
        // Diagonal cell (a, a) has both row and column named, still +10 once.
        assert_eq!(matrix.get("a", "a").unwrap(), raw_aa + 10.0);
        // Unnamed cell untouched.
        assert_eq!(matrix.get("b", "b").unwrap(), 1.0);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("matrix.bin");

        let vectors = vector_set(&[("a", vec![1.0, 0.2]), ("b", vec![0.2, 1.0])]);
        let matrix = SimilarityMatrix::from_vectors(&vectors);
        matrix.save(&path).unwrap();

        let reloaded = SimilarityMatrix::load(&path).unwrap();
        assert_eq!(reloaded.ids(), matrix.ids());
        assert_eq!(
            reloaded.get("a", "b").unwrap().to_bits(),
            matrix.get("a", "b").unwrap().to_bits()
        );

        let vec_path = dir.path().join("vectors.bin");
        vectors.save(&vec_path).unwrap();
        let reloaded_vectors = VectorSet::load(&vec_path).unwrap();
        assert_eq!(reloaded_vectors.ids(), vectors.ids());
        assert_eq!(reloaded_vectors.get("a"), vectors.get("a"));
    }
}
