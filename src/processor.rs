//! # Change processing
//!
//! One [`ChangeProcessor`] pass drains the upstream change logs and patches
//! the engine state in strict phase order: insert, then update, then
//! delete. Each phase is guarded independently; a failure is logged, the
//! phase's IDs stay unmarked upstream (so the next pass retries them), and
//! the remaining phases still run. There is no cross-phase transaction —
//! partial progress is tolerated because every phase is idempotent:
//! inserting an ID that already has a row overwrites it, an update for an
//! unknown ID is treated as an insert, and deleting an absent ID is a
//! no-op.
//!
//! Mutation order within a phase is fixed: alignment check, encode the
//! whole batch (so an encoder failure aborts before any row is written),
//! then vectors, matrices, normalization, cache publish. A cache-write
//! failure after the matrices are patched is logged but does not roll
//! anything back; the numeric state is correct and the lists converge on a
//! later publish.

use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::cache::{NeighborCache, NeighborKind};
use crate::encoder::TextEncoder;
use crate::error::EngineResult;
use crate::models::Post;
use crate::publish::NeighborPublisher;
use crate::source::ChangeSource;
use crate::state::EngineState;

/// IDs each phase of a pass actually committed.
#[derive(Debug, Default)]
pub struct PassOutcome {
    /// Posts appended by the insert phase.
    pub inserted: Vec<String>,
    /// Posts overwritten by the update phase, including updates redirected
    /// to the insert path because the ID was not in the corpus yet.
    pub updated: Vec<String>,
    /// Posts removed by the delete phase.
    pub deleted: Vec<String>,
}

impl PassOutcome {
    /// Total number of committed changes across all phases.
    pub fn total(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }
}

/// Drives one insert/update/delete pass over the engine state.
pub struct ChangeProcessor<'a> {
    semantic: &'a dyn TextEncoder,
    publisher: NeighborPublisher,
}

impl<'a> ChangeProcessor<'a> {
    pub fn new(semantic: &'a dyn TextEncoder, publisher: NeighborPublisher) -> Self {
        Self { semantic, publisher }
    }

    /// Run one full pass: drain all three change logs, patch the state,
    /// publish neighbor lists, and mark the committed IDs processed
    /// upstream.
    ///
    /// Never fails as a whole; per-phase errors are logged and the affected
    /// IDs retried on the next pass.
    pub fn run_pass(
        &self,
        state: &mut EngineState,
        source: &mut dyn ChangeSource,
        cache: &mut dyn NeighborCache,
    ) -> PassOutcome {
        let mut outcome = PassOutcome::default();

        match source.fetch_unprocessed_inserted() {
            Ok(posts) => match self.apply_upserts(state, posts, cache) {
                Ok(ids) => outcome.inserted = ids,
                Err(e) => error!(error = %e, "insert phase failed, will retry next pass"),
            },
            Err(e) => error!(error = %e, "fetching inserted posts failed"),
        }

        match source.fetch_unprocessed_updated() {
            Ok(posts) => {
                let redirected = posts.iter().filter(|p| !state.contains_post(&p.id)).count();
                if redirected > 0 {
                    debug!(redirected, "updates for unknown posts routed to insert path");
                }
                match self.apply_upserts(state, posts, cache) {
                    Ok(ids) => outcome.updated = ids,
                    Err(e) => error!(error = %e, "update phase failed, will retry next pass"),
                }
            }
            Err(e) => error!(error = %e, "fetching updated posts failed"),
        }

        match source.fetch_unprocessed_deleted() {
            Ok(ids) => match self.apply_deletes(state, ids, cache) {
                Ok(ids) => outcome.deleted = ids,
                Err(e) => error!(error = %e, "delete phase failed, will retry next pass"),
            },
            Err(e) => error!(error = %e, "fetching deleted post ids failed"),
        }

        let mut upserted = outcome.inserted.clone();
        upserted.extend_from_slice(&outcome.updated);
        if !upserted.is_empty() {
            if let Err(e) = source.mark_processed(&upserted) {
                error!(error = %e, "marking upserts processed failed, expect replays");
            }
        }
        if !outcome.deleted.is_empty() {
            if let Err(e) = source.mark_deletions_processed(&outcome.deleted) {
                error!(error = %e, "marking deletions processed failed, expect replays");
            }
        }

        if outcome.total() > 0 {
            info!(
                inserted = outcome.inserted.len(),
                updated = outcome.updated.len(),
                deleted = outcome.deleted.len(),
                corpus = state.len(),
                "change pass committed"
            );
        }
        outcome
    }

    /// Shared insert/update path: encode a batch, upsert vectors, patch both
    /// matrices, normalize the touched semantic rows, publish those IDs.
    ///
    /// New IDs are appended; known IDs have their rows overwritten in
    /// place. The whole batch is encoded up front, so an encoder failure
    /// leaves the state untouched.
    fn apply_upserts(
        &self,
        state: &mut EngineState,
        posts: Vec<Post>,
        cache: &mut dyn NeighborCache,
    ) -> EngineResult<Vec<String>> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }
        state.check_alignment()?;

        let mut lexical_rows = Vec::with_capacity(posts.len());
        let mut semantic_rows = Vec::with_capacity(posts.len());
        for post in &posts {
            let text = post.text();
            lexical_rows.push(state.lexical_encoder.transform(&text)?);
            semantic_rows.push(self.semantic.transform(&text)?);
        }

        let ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        for (post, (lex, sem)) in posts
            .into_iter()
            .zip(lexical_rows.iter().zip(&semantic_rows))
        {
            state.lexical_vectors.upsert(&post.id, lex.clone());
            state.semantic_vectors.upsert(&post.id, sem.clone());
            state.upsert_post(post);
        }

        state
            .lexical_matrix
            .upsert_rows(&ids, &lexical_rows, &state.lexical_vectors)?;
        state
            .semantic_matrix
            .upsert_rows(&ids, &semantic_rows, &state.semantic_vectors)?;
        let touched: HashSet<String> = ids.iter().cloned().collect();
        state
            .normalizer
            .normalize_rows(&mut state.semantic_matrix, &touched);

        if let Err(e) =
            self.publisher
                .publish(&ids, &state.lexical_matrix, &state.semantic_matrix, cache)
        {
            warn!(error = %e, "neighbor publish failed, matrices stay committed");
        }
        Ok(ids)
    }

    /// Delete path: drop rows from every store, remove the deleted posts'
    /// cache keys, and republish every surviving post — a deletion can
    /// promote a previously below-N candidate into a survivor's list, so
    /// pruning the cached lists is not enough.
    fn apply_deletes(
        &self,
        state: &mut EngineState,
        ids: Vec<String>,
        cache: &mut dyn NeighborCache,
    ) -> EngineResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        state.check_alignment()?;

        let dropped: HashSet<String> = ids.iter().cloned().collect();
        state.remove_posts(&dropped);
        state.lexical_vectors.remove_ids(&dropped);
        state.semantic_vectors.remove_ids(&dropped);
        state.lexical_matrix.drop_ids(&dropped);
        state.semantic_matrix.drop_ids(&dropped);

        let keys: Vec<String> = ids.iter().map(|id| NeighborKind::Post.key(id)).collect();
        if let Err(e) = cache.delete_many(&keys) {
            warn!(error = %e, "removing deleted posts' cache keys failed");
        }

        let survivors = state.ordered_ids();
        if let Err(e) = self.publisher.publish(
            &survivors,
            &state.lexical_matrix,
            &state.semantic_matrix,
            cache,
        ) {
            warn!(error = %e, "republish after delete failed, lists stale until next pass");
        }
        Ok(ids)
    }
}
