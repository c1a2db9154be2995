//! # Kindred (library root)
//!
//! Kindred maintains a content-similarity index over a mutable corpus of
//! posts and derives a user-similarity index from it, powering "related
//! content" and "people you may follow" recommendations.
//!
//! The interesting part is the **incremental maintenance engine**: given a
//! stream of insert/update/delete change events against the corpus, it keeps
//! two pairwise similarity matrices (a lexical TF-IDF one and a semantic
//! embedding one) consistent with the live post set, combines them with
//! configurable weights, and republishes top-N neighbor lists to a
//! low-latency cache — without ever recomputing the full O(n²) matrix on a
//! change.
//!
//! ## Modules
//! - [`source`]: the upstream change-data-capture contract and its
//!   Diesel/SQLite implementation.
//! - [`encoder`] / [`embedding`]: the lexical and semantic text encoders
//!   behind a single `TextEncoder` capability trait.
//! - [`matrix`]: ID-indexed vector sets and symmetric similarity matrices
//!   with O(k·n) incremental patching.
//! - [`normalize`]: min/max rescaling with persisted reference bounds.
//! - [`state`]: the owned, persisted engine state (corpus, vectors,
//!   matrices, fitted encoder) with an explicit load/save lifecycle.
//! - [`processor`]: the Insert → Update → Delete change pass.
//! - [`publish`]: weighted combination, top-N selection, cache publishing.
//! - [`users`]: the batch user-similarity aggregator.
//! - [`cache`]: the neighbor-list cache (Redis or in-memory) and the
//!   read-only serving accessor.
//! - [`config`], [`commands`], [`error`]: configuration, CLI, and the error
//!   taxonomy.
//!
//! ## Data flow
//! ```text
//! change events → ChangeProcessor → {SimilarityMatrix ×2}
//!               → ScoreNormalizer → NeighborPublisher → cache
//!
//! (coarser cadence)
//! combined matrix + membership maps → UserSimilarityAggregator → cache
//! ```

use directories::ProjectDirs;
use std::error::Error;
use std::path::PathBuf;

pub mod cache;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod matrix;
pub mod models;
pub mod normalize;
pub mod processor;
pub mod publish;
pub mod schema;
pub mod source;
pub mod state;
pub mod users;

/// Return the per-platform configuration directory used by Kindred.
///
/// Uses [`directories::ProjectDirs`] with the application triple
/// `("io", "kindred-rec", "kindred")`, so the path follows each OS's
/// conventions (e.g. `~/.config/kindred` under XDG).
///
/// The directory is **not** created by this function; callers that need it
/// should create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be
/// determined.
pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("io", "kindred-rec", "kindred")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Default location for persisted engine state (corpus snapshot, vector
/// sets, similarity matrices, fitted encoder, normalizer bounds).
///
/// This is `config_dir()/data`; the `data_dir` config key overrides it.
pub fn default_data_dir() -> Result<PathBuf, Box<dyn Error>> {
    Ok(config_dir()?.join("data"))
}
