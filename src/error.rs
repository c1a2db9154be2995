//! # Error taxonomy
//!
//! Every failure the engine can hit during a change pass maps onto one of the
//! variants below, and each variant carries its own retry story:
//!
//! - [`EngineError::UpstreamFetch`]: the change source was unreachable. The
//!   affected phase is skipped and nothing is marked processed, so the same
//!   rows come back on the next scheduled pass.
//! - [`EngineError::Encoding`]: vectorization failed for a batch. The whole
//!   phase aborts before any row is written, keeping the matrices untouched.
//! - [`EngineError::Alignment`]: the corpus and a matrix disagree on the live
//!   ID set. Fatal for the current pass; further mutation of that matrix
//!   would corrupt the ID↔row mapping, so the pass halts loudly.
//! - [`EngineError::CacheWrite`]: a publish to the cache failed. The numeric
//!   state is still correct, so this is logged and retried on a later cycle.
//!
//! The remaining variants cover persistence and configuration plumbing.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for the similarity engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The upstream change source (CDC tables) could not be read or updated.
    #[error("upstream change source failed: {0}")]
    UpstreamFetch(String),

    /// A lexical or semantic encoder failed to produce vectors for a batch.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The corpus ID set and a matrix/vector-set row set have diverged.
    #[error("alignment violated: {0}")]
    Alignment(String),

    /// A cache write (single or pipelined) failed.
    #[error("cache write failed: {0}")]
    CacheWrite(String),

    /// Filesystem I/O failed while loading or saving persisted state.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted state could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The configuration file is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

impl From<diesel::result::Error> for EngineError {
    fn from(e: diesel::result::Error) -> Self {
        Self::UpstreamFetch(e.to_string())
    }
}

impl From<diesel::result::ConnectionError> for EngineError {
    fn from(e: diesel::result::ConnectionError) -> Self {
        Self::UpstreamFetch(e.to_string())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(e: redis::RedisError) -> Self {
        Self::CacheWrite(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;
