//! # Persisted engine state
//!
//! Everything the engine owns between passes lives in one [`EngineState`]
//! value: the corpus snapshot, the raw vector sets for both spaces, both
//! similarity matrices, the fitted lexical encoder, and the normalizer
//! bounds. The state is passed explicitly into each phase call rather than
//! living in module-level globals, with an explicit [`load`]/[`save`]
//! lifecycle at process boundaries.
//!
//! All pieces persist as bincode files under one data directory and must
//! reload bit-for-bit consistent. The corpus row order defines the vector
//! row order; [`EngineState::check_alignment`] verifies that every store
//! agrees on the live ID set and is called before any patch operation.
//!
//! [`load`]: EngineState::load
//! [`save`]: EngineState::save

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::encoder::{TextEncoder, TfIdfEncoder};
use crate::error::{EngineError, EngineResult};
use crate::matrix::{SimilarityMatrix, VectorSet};
use crate::models::Post;
use crate::normalize::ScoreNormalizer;

/// Write a value to disk as bincode, creating parent directories as needed.
pub(crate) fn write_bincode<T: Serialize>(value: &T, path: &Path) -> EngineResult<()> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| EngineError::Codec(e.to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EngineError::storage(parent, e))?;
    }
    fs::write(path, bytes).map_err(|e| EngineError::storage(path, e))
}

/// Read a bincode-encoded value from disk.
pub(crate) fn read_bincode<T: DeserializeOwned>(path: &Path) -> EngineResult<T> {
    let bytes = fs::read(path).map_err(|e| EngineError::storage(path, e))?;
    let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
        .map_err(|e| EngineError::Codec(format!("{}: {e}", path.display())))?;
    Ok(value)
}

/// File layout of the persisted state under the data directory.
struct StatePaths {
    corpus: PathBuf,
    lexical_encoder: PathBuf,
    lexical_vectors: PathBuf,
    semantic_vectors: PathBuf,
    lexical_matrix: PathBuf,
    semantic_matrix: PathBuf,
    normalizer: PathBuf,
}

impl StatePaths {
    fn new(dir: &Path) -> Self {
        Self {
            corpus: dir.join("corpus.bin"),
            lexical_encoder: dir.join("tfidf_model.bin"),
            lexical_vectors: dir.join("tfidf_vectors.bin"),
            semantic_vectors: dir.join("embedding_vectors.bin"),
            lexical_matrix: dir.join("tfidf_matrix.bin"),
            semantic_matrix: dir.join("embedding_matrix.bin"),
            normalizer: dir.join("normalizer.bin"),
        }
    }
}

/// The engine's owned state: corpus, vectors, matrices, fitted encoder,
/// normalizer bounds.
///
/// During a pass the change processor has exclusive ownership; no other
/// component writes these structures concurrently.
#[derive(Debug)]
pub struct EngineState {
    corpus: Vec<Post>,
    corpus_index: HashMap<String, usize>,
    /// Fitted lexical encoder; refitted only by [`initialize`](Self::initialize).
    pub lexical_encoder: TfIdfEncoder,
    /// Raw TF-IDF vectors, row-aligned with the corpus.
    pub lexical_vectors: VectorSet,
    /// L2-normalized embedding vectors, row-aligned with the corpus.
    pub semantic_vectors: VectorSet,
    /// Lexical similarity matrix (unnormalized cosine).
    pub lexical_matrix: SimilarityMatrix,
    /// Semantic similarity matrix (normalized into [0, 1]).
    pub semantic_matrix: SimilarityMatrix,
    /// Reference bounds fitted over the raw semantic matrix.
    pub normalizer: ScoreNormalizer,
}

impl EngineState {
    /// Build the full state from scratch over a corpus snapshot.
    ///
    /// This is the only operation that refits the lexical vocabulary. It
    /// computes both vector sets, both full pairwise matrices, fits the
    /// normalizer on the raw semantic scores, and normalizes the semantic
    /// matrix.
    ///
    /// # Errors
    /// `EngineError::Encoding` if either encoder fails on any document; no
    /// partial state is produced.
    pub fn initialize(posts: Vec<Post>, semantic: &dyn TextEncoder) -> EngineResult<Self> {
        info!(posts = posts.len(), "initializing engine state");

        let texts: Vec<String> = posts.iter().map(Post::text).collect();
        let lexical_encoder = TfIdfEncoder::fit(&texts);

        let mut lexical_vectors = VectorSet::new();
        let mut semantic_vectors = VectorSet::new();
        for (post, text) in posts.iter().zip(&texts) {
            lexical_vectors.upsert(&post.id, lexical_encoder.transform(text)?);
            semantic_vectors.upsert(&post.id, semantic.transform(text)?);
        }

        let lexical_matrix = SimilarityMatrix::from_vectors(&lexical_vectors);
        let mut semantic_matrix = SimilarityMatrix::from_vectors(&semantic_vectors);
        let normalizer = ScoreNormalizer::fit(&semantic_matrix);
        normalizer.normalize_all(&mut semantic_matrix);

        let corpus_index = build_index(&posts);
        Ok(Self {
            corpus: posts,
            corpus_index,
            lexical_encoder,
            lexical_vectors,
            semantic_vectors,
            lexical_matrix,
            semantic_matrix,
            normalizer,
        })
    }

    /// Reload the persisted state from a data directory.
    ///
    /// # Errors
    /// Storage/codec errors for unreadable files, and
    /// `EngineError::Alignment` if the reloaded stores disagree on the live
    /// ID set (a torn save; continuing would corrupt the matrices).
    pub fn load(dir: &Path) -> EngineResult<Self> {
        let paths = StatePaths::new(dir);
        let corpus: Vec<Post> = read_bincode(&paths.corpus)?;
        let corpus_index = build_index(&corpus);
        let state = Self {
            corpus,
            corpus_index,
            lexical_encoder: read_bincode(&paths.lexical_encoder)?,
            lexical_vectors: VectorSet::load(&paths.lexical_vectors)?,
            semantic_vectors: VectorSet::load(&paths.semantic_vectors)?,
            lexical_matrix: SimilarityMatrix::load(&paths.lexical_matrix)?,
            semantic_matrix: SimilarityMatrix::load(&paths.semantic_matrix)?,
            normalizer: ScoreNormalizer::load(&paths.normalizer)?,
        };
        state.check_alignment()?;
        Ok(state)
    }

    /// Persist the full state to a data directory.
    pub fn save(&self, dir: &Path) -> EngineResult<()> {
        let paths = StatePaths::new(dir);
        write_bincode(&self.corpus, &paths.corpus)?;
        write_bincode(&self.lexical_encoder, &paths.lexical_encoder)?;
        self.lexical_vectors.save(&paths.lexical_vectors)?;
        self.semantic_vectors.save(&paths.semantic_vectors)?;
        self.lexical_matrix.save(&paths.lexical_matrix)?;
        self.semantic_matrix.save(&paths.semantic_matrix)?;
        self.normalizer.save(&paths.normalizer)?;
        info!(dir = %dir.display(), posts = self.corpus.len(), "engine state saved");
        Ok(())
    }

    /// Number of live posts.
    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    /// Whether the corpus is empty.
    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    /// Whether a post is part of the live corpus.
    pub fn contains_post(&self, id: &str) -> bool {
        self.corpus_index.contains_key(id)
    }

    /// The live post-ID set.
    pub fn live_ids(&self) -> HashSet<String> {
        self.corpus.iter().map(|p| p.id.clone()).collect()
    }

    /// The live post IDs in corpus order.
    pub fn ordered_ids(&self) -> Vec<String> {
        self.corpus.iter().map(|p| p.id.clone()).collect()
    }

    /// Append a new post, or overwrite the caption/body of an existing one
    /// in place (keeping its row position).
    pub fn upsert_post(&mut self, post: Post) {
        match self.corpus_index.get(&post.id) {
            Some(&i) => self.corpus[i] = post,
            None => {
                self.corpus_index.insert(post.id.clone(), self.corpus.len());
                self.corpus.push(post);
            }
        }
    }

    /// Remove posts from the corpus snapshot, keeping survivor order.
    pub fn remove_posts(&mut self, ids: &HashSet<String>) {
        self.corpus.retain(|p| !ids.contains(&p.id));
        self.corpus_index = build_index(&self.corpus);
    }

    /// Verify that the corpus, both vector sets, and both matrices agree on
    /// the live ID set.
    ///
    /// Must pass before any patch operation; a divergence is fatal for the
    /// current pass.
    pub fn check_alignment(&self) -> EngineResult<()> {
        let live = self.live_ids();
        let lexical_rows: HashSet<String> =
            self.lexical_vectors.ids().iter().cloned().collect();
        if lexical_rows != live {
            return Err(EngineError::Alignment(format!(
                "lexical vector rows ({}) diverge from corpus ({})",
                lexical_rows.len(),
                live.len()
            )));
        }
        let semantic_rows: HashSet<String> =
            self.semantic_vectors.ids().iter().cloned().collect();
        if semantic_rows != live {
            return Err(EngineError::Alignment(format!(
                "semantic vector rows ({}) diverge from corpus ({})",
                semantic_rows.len(),
                live.len()
            )));
        }
        self.lexical_matrix.align(&live)?;
        self.semantic_matrix.align(&live)?;
        Ok(())
    }
}

fn build_index(posts: &[Post]) -> HashMap<String, usize> {
    posts
        .iter()
        .enumerate()
        .map(|(i, p)| (p.id.clone(), i))
        .collect()
}
