//! # User similarity
//!
//! Derives user×user similarity from the post matrices: the score for an
//! ordered pair `(a, b)` is the combined post similarity averaged over the
//! Cartesian product of `a`'s posts and `b`'s posts. Users the subject
//! already follows are excluded from their candidate set, as is the subject
//! itself.
//!
//! Unlike the post side this path is batch, not incremental: every run
//! recombines the two stored matrices fresh. Worst case is O(U² · P̄²),
//! which is acceptable only because the aggregator runs on a much coarser
//! cadence than change passes and must never be invoked per post change.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use crate::cache::{NeighborCache, NeighborKind};
use crate::config::KindredConfig;
use crate::error::EngineResult;
use crate::matrix::SimilarityMatrix;
use crate::publish::rank_top_n;

/// Batch recomputer and publisher of similar-user lists.
pub struct UserSimilarityAggregator {
    weight_lexical: f32,
    weight_semantic: f32,
    top_n: usize,
}

impl UserSimilarityAggregator {
    pub fn new(weight_lexical: f32, weight_semantic: f32, top_n: usize) -> Self {
        Self {
            weight_lexical,
            weight_semantic,
            top_n,
        }
    }

    /// Build an aggregator from the engine configuration.
    pub fn from_config(config: &KindredConfig) -> Self {
        Self::new(config.weight_lexical, config.weight_semantic, config.top_n_users)
    }

    /// Recompute every user's ordered similar-user list and publish the
    /// lists in one pipelined batch.
    ///
    /// `post_owner` maps post ID to owning user; `follows` maps a user to
    /// the set of users they already follow. Posts absent from either
    /// matrix are skipped, as are post pairs with no stored score; a
    /// candidate with no scorable post pair at all simply does not rank.
    ///
    /// # Errors
    /// `EngineError::CacheWrite` if the pipelined publish fails; the
    /// computed mapping is lost and the next scheduled run recomputes it.
    pub fn recompute(
        &self,
        lexical: &SimilarityMatrix,
        semantic: &SimilarityMatrix,
        post_owner: &HashMap<String, String>,
        follows: &HashMap<String, HashSet<String>>,
        cache: &mut dyn NeighborCache,
    ) -> EngineResult<BTreeMap<String, Vec<String>>> {
        let mut posts_by_user: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (post_id, user_id) in post_owner {
            if lexical.contains(post_id) && semantic.contains(post_id) {
                posts_by_user.entry(user_id).or_default().push(post_id);
            }
        }
        debug!(users = posts_by_user.len(), "recomputing user similarity");

        let empty = HashSet::new();
        let mut neighbors = BTreeMap::new();
        for (&subject, subject_posts) in &posts_by_user {
            let followed = follows.get(subject).unwrap_or(&empty);
            let mut candidates = Vec::new();
            for (&other, other_posts) in &posts_by_user {
                if other == subject || followed.contains(other) {
                    continue;
                }
                if let Some(score) =
                    self.average_similarity(subject_posts, other_posts, lexical, semantic)
                {
                    candidates.push((other.to_string(), score));
                }
            }
            neighbors.insert(subject.to_string(), rank_top_n(candidates, self.top_n));
        }

        let entries: Vec<(String, String)> = neighbors
            .iter()
            .map(|(user, list)| (NeighborKind::User.key(user), list.join(",")))
            .collect();
        cache.set_many(&entries)?;
        info!(users = neighbors.len(), "similar-user lists published");
        Ok(neighbors)
    }

    /// Average combined similarity over the Cartesian product of two post
    /// sets. `None` when no pair has a stored score.
    fn average_similarity(
        &self,
        a_posts: &[&str],
        b_posts: &[&str],
        lexical: &SimilarityMatrix,
        semantic: &SimilarityMatrix,
    ) -> Option<f32> {
        let mut sum = 0.0f32;
        let mut pairs = 0usize;
        for &a in a_posts {
            for &b in b_posts {
                let (Some(lex), Some(sem)) = (lexical.get(a, b), semantic.get(a, b)) else {
                    continue;
                };
                sum += self.weight_lexical * lex + self.weight_semantic * sem;
                pairs += 1;
            }
        }
        (pairs > 0).then(|| sum / pairs as f32)
    }
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

    fn owners(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(p, u)| (p.to_string(), u.to_string()))
            .collect()
    }

    #[test]
    fn users_with_similar_posts_rank_first() {
        let (lexical, semantic) = matrices_for(&[
            ("p1", "paris museums"),
            ("p2", "paris food"),
            ("p3", "tokyo temples"),
        ]);
        let post_owner = owners(&[("p1", "alice"), ("p2", "bob"), ("p3", "carol")]);
        let aggregator = UserSimilarityAggregator::new(0.5, 0.5, 10);
        let mut cache = MemoryCache::new();
        let neighbors = aggregator
            .recompute(&lexical, &semantic, &post_owner, &HashMap::new(), &mut cache)
            .unwrap();

        assert_eq!(neighbors["alice"].first().map(String::as_str), Some("bob"));
        assert_eq!(
            read_neighbors(&mut cache, NeighborKind::User, "alice")
                .first()
                .map(String::as_str),
            Some("bob")
        );
    }

    #[test]
    fn followed_users_are_excluded_from_the_list() {
        let (lexical, semantic) = matrices_for(&[
            ("p1", "paris museums"),
            ("p2", "paris food"),
            ("p3", "tokyo temples"),
        ]);
        let post_owner = owners(&[("p1", "alice"), ("p2", "bob"), ("p3", "carol")]);
        let follows = HashMap::from([(
            "alice".to_string(),
            HashSet::from(["bob".to_string()]),
        )]);
        let aggregator = UserSimilarityAggregator::new(0.5, 0.5, 10);
        let mut cache = MemoryCache::new();
        let neighbors = aggregator
            .recompute(&lexical, &semantic, &post_owner, &follows, &mut cache)
            .unwrap();

        assert!(!neighbors["alice"].contains(&"bob".to_string()));
        // The exclusion is one-directional.
        assert!(neighbors["bob"].contains(&"alice".to_string()));
    }

    #[test]
    fn lists_never_contain_the_subject_and_respect_top_n() {
        let (lexical, semantic) = matrices_for(&[
            ("p1", "paris museums"),
            ("p2", "paris food"),
            ("p3", "paris parks"),
            ("p4", "paris cafes"),
        ]);
        let post_owner = owners(&[
            ("p1", "alice"),
            ("p2", "bob"),
            ("p3", "carol"),
            ("p4", "dave"),
        ]);
        let aggregator = UserSimilarityAggregator::new(0.5, 0.5, 2);
        let mut cache = MemoryCache::new();
        let neighbors = aggregator
            .recompute(&lexical, &semantic, &post_owner, &HashMap::new(), &mut cache)
            .unwrap();

        for (user, list) in &neighbors {
            assert!(!list.contains(user));
            assert_eq!(list.len(), 2);
        }
    }

    #[test]
    fn posts_missing_from_the_matrices_are_skipped_not_zeroed() {
        let (lexical, semantic) = matrices_for(&[("p1", "paris museums"), ("p2", "paris food")]);
        // p9 is owned but was never indexed; bob still ranks via p2 alone.
        let post_owner = owners(&[("p1", "alice"), ("p2", "bob"), ("p9", "bob")]);
        let aggregator = UserSimilarityAggregator::new(0.5, 0.5, 10);
        let mut cache = MemoryCache::new();
        let neighbors = aggregator
            .recompute(&lexical, &semantic, &post_owner, &HashMap::new(), &mut cache)
            .unwrap();

        assert_eq!(neighbors["alice"], vec!["bob"]);
    }
}
