//! # Neighbor combination and publishing
//!
//! Merges the two similarity matrices by weighted sum, selects the top-N
//! neighbors per post, and writes the ordered lists to the cache.
//!
//! Ranking is score-descending with a deterministic tie-break: among equal
//! scores, the lexicographically smaller ID wins. The subject itself is
//! always excluded. Batch publishes go through the cache's pipelined
//! multi-SET so republishing the whole corpus (after a deletion) stays one
//! round-trip.

use tracing::debug;

use crate::cache::{NeighborCache, NeighborKind};
use crate::config::KindredConfig;
use crate::error::EngineResult;
use crate::matrix::SimilarityMatrix;

/// Weighted combiner and top-N publisher for post neighbor lists.
pub struct NeighborPublisher {
    weight_lexical: f32,
    weight_semantic: f32,
    top_n: usize,
}

impl NeighborPublisher {
    /// Build a publisher with explicit weights and list size.
    ///
    /// The weights conventionally sum to 1.0 (default 0.5/0.5) but are not
    /// required to; ranking only depends on their ratio.
    pub fn new(weight_lexical: f32, weight_semantic: f32, top_n: usize) -> Self {
        Self {
            weight_lexical,
            weight_semantic,
            top_n,
        }
    }

    /// Build a publisher from the engine configuration.
    pub fn from_config(config: &KindredConfig) -> Self {
        Self::new(config.weight_lexical, config.weight_semantic, config.top_n_posts)
    }

    /// Compute the ordered top-N neighbor IDs for one post.
    ///
    /// Returns `None` when the post is missing from either matrix.
    pub fn top_neighbors(
        &self,
        id: &str,
        lexical: &SimilarityMatrix,
        semantic: &SimilarityMatrix,
    ) -> Option<Vec<String>> {
        let lexical_row = lexical.get_row(id)?;
        let mut combined = Vec::with_capacity(lexical_row.len().saturating_sub(1));
        for (other, lex_score) in lexical_row {
            if other == id {
                continue;
            }
            let sem_score = semantic.get(id, &other)?;
            combined.push((
                other,
                self.weight_lexical * lex_score + self.weight_semantic * sem_score,
            ));
        }
        Some(rank_top_n(combined, self.top_n))
    }

    /// Publish neighbor lists for the given post IDs in one pipelined
    /// batch.
    ///
    /// IDs missing from the matrices are skipped (they were dropped between
    /// computation and publish); present IDs with no eligible neighbors
    /// publish the empty string.
    ///
    /// # Errors
    /// `EngineError::CacheWrite` if the pipelined write fails. The matrices
    /// are untouched by then, so callers may log and retry on a later pass.
    pub fn publish(
        &self,
        ids: &[String],
        lexical: &SimilarityMatrix,
        semantic: &SimilarityMatrix,
        cache: &mut dyn NeighborCache,
    ) -> EngineResult<()> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(neighbors) = self.top_neighbors(id, lexical, semantic) {
                entries.push((NeighborKind::Post.key(id), neighbors.join(",")));
            }
        }
        debug!(requested = ids.len(), published = entries.len(), "publishing neighbor lists");
        cache.set_many(&entries)
    }
}

/// Order candidates by score descending, breaking ties by ascending ID,
/// and keep the first `n`.
pub fn rank_top_n(mut scores: Vec<(String, f32)>, n: usize) -> Vec<String> {
    scores.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scores.truncate(n);
    scores.into_iter().map(|(id, _)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, read_neighbors};
    use crate::encoder::{TextEncoder, TfIdfEncoder};
    use crate::matrix::{SimilarityMatrix, VectorSet};

    fn matrices_for(texts: &[(&str, &str)]) -> (SimilarityMatrix, SimilarityMatrix) {
        let corpus: Vec<String> = texts.iter().map(|(_, t)| t.to_string()).collect();
        let encoder = TfIdfEncoder::fit(&corpus);
        let mut vectors = VectorSet::new();
        for (id, text) in texts {
            vectors.upsert(id, encoder.transform(text).unwrap());
        }
        let matrix = SimilarityMatrix::from_vectors(&vectors);
        (matrix.clone(), matrix)
    }

    #[test]
    fn paris_posts_prefer_each_other_over_tokyo() {
        let (lexical, semantic) = matrices_for(&[
            ("A", "paris museums"),
            ("B", "paris food"),
            ("C", "tokyo temples"),
        ]);
        let publisher = NeighborPublisher::new(0.5, 0.5, 1);
        let neighbors = publisher.top_neighbors("A", &lexical, &semantic).unwrap();
        assert_eq!(neighbors, vec!["B"]);
    }

    #[test]
    fn neighbor_lists_never_contain_the_subject() {
        let (lexical, semantic) = matrices_for(&[
            ("A", "paris museums"),
            ("B", "paris food"),
            ("C", "paris parks"),
        ]);
        let publisher = NeighborPublisher::new(0.5, 0.5, 5);
        for id in ["A", "B", "C"] {
            let neighbors = publisher.top_neighbors(id, &lexical, &semantic).unwrap();
            assert!(!neighbors.contains(&id.to_string()));
        }
    }

    #[test]
    fn list_length_is_bounded_by_top_n_and_exact_when_enough_candidates() {
        let (lexical, semantic) = matrices_for(&[
            ("A", "paris museums"),
            ("B", "paris food"),
            ("C", "paris parks"),
            ("D", "paris cafes"),
        ]);
        let publisher = NeighborPublisher::new(0.5, 0.5, 2);
        let neighbors = publisher.top_neighbors("A", &lexical, &semantic).unwrap();
        // 3 eligible candidates, N = 2 → exactly 2.
        assert_eq!(neighbors.len(), 2);

        let generous = NeighborPublisher::new(0.5, 0.5, 10);
        let neighbors = generous.top_neighbors("A", &lexical, &semantic).unwrap();
        assert_eq!(neighbors.len(), 3);
    }

    #[test]
    fn equal_scores_break_ties_by_ascending_id() {
        let ranked = rank_top_n(
            vec![
                ("zeta".to_string(), 0.8),
                ("alpha".to_string(), 0.8),
                ("mid".to_string(), 0.9),
            ],
            3,
        );
        assert_eq!(ranked, vec!["mid", "alpha", "zeta"]);
    }

    #[test]
    fn full_republish_after_clear_drops_stale_lists() {
        let (lexical, semantic) = matrices_for(&[("A", "paris museums"), ("B", "paris food")]);
        let mut cache = MemoryCache::new();
        // Leftovers from posts and users that vanished while the engine was
        // not running.
        cache.set("similar-post:gone", "A,B").unwrap();
        cache.set("similar-user:u1", "u2").unwrap();

        cache.clear().unwrap();
        let publisher = NeighborPublisher::new(0.5, 0.5, 5);
        let ids = vec!["A".to_string(), "B".to_string()];
        publisher
            .publish(&ids, &lexical, &semantic, &mut cache)
            .unwrap();

        assert!(cache.get("similar-post:gone").unwrap().is_none());
        assert!(cache.get("similar-user:u1").unwrap().is_none());
        assert_eq!(
            read_neighbors(&mut cache, NeighborKind::Post, "A"),
            vec!["B"]
        );
    }

    #[test]
    fn publish_writes_comma_joined_lists_under_post_keys() {
        let (lexical, semantic) = matrices_for(&[
            ("A", "paris museums"),
            ("B", "paris food"),
            ("C", "tokyo temples"),
        ]);
        let publisher = NeighborPublisher::new(0.5, 0.5, 2);
        let mut cache = MemoryCache::new();
        let ids: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        publisher
            .publish(&ids, &lexical, &semantic, &mut cache)
            .unwrap();

        let a = read_neighbors(&mut cache, NeighborKind::Post, "A");
        assert_eq!(a.first().map(String::as_str), Some("B"));
        assert!(a.len() <= 2);

        // Unknown IDs are skipped, not published as empty.
        publisher
            .publish(&["ghost".to_string()], &lexical, &semantic, &mut cache)
            .unwrap();
        assert!(cache.get("similar-post:ghost").unwrap().is_none());
    }
}
