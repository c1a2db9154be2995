//! This module provides functionality for loading and handling the engine's
//! configuration.
//!
//! It defines the `KindredConfig` struct, which holds every tunable the
//! engine exposes (store URLs, combination weights, top-N sizes, scheduler
//! cadences), and a `load_config` function to load it from a YAML file.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use kindred::config::{KindredConfig, load_config};
//!
//! let config: KindredConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

fn default_weight() -> f32 {
    0.5
}

fn default_top_n_posts() -> usize {
    5
}

fn default_top_n_users() -> usize {
    10
}

fn default_pass_interval_secs() -> u64 {
    120
}

fn default_user_pass_interval_secs() -> u64 {
    3600
}

fn default_prune_interval_secs() -> u64 {
    300
}

/// Runtime configuration for the similarity engine.
///
/// Loaded once from YAML at startup (see [`load_config`]) and passed by
/// reference into the components that need it. The weights conventionally
/// sum to 1.0 but are not required to.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct KindredConfig {
    /// SQLite URL of the application database holding the posts table and
    /// the CDC change tables (`post_changes`, `deleted_posts`, `follows`).
    pub database_url: String,

    /// Redis connection URL for the neighbor-list cache
    /// (e.g. `redis://127.0.0.1:6379/0`).
    pub redis_url: String,

    /// Directory holding persisted engine state. Defaults to
    /// `config_dir()/data` when absent.
    pub data_dir: Option<PathBuf>,

    /// Weight applied to the lexical (TF-IDF) similarity matrix.
    #[serde(default = "default_weight")]
    pub weight_lexical: f32,

    /// Weight applied to the semantic (embedding) similarity matrix.
    #[serde(default = "default_weight")]
    pub weight_semantic: f32,

    /// Number of neighbor posts published per post.
    #[serde(default = "default_top_n_posts")]
    pub top_n_posts: usize,

    /// Number of neighbor users published per user.
    #[serde(default = "default_top_n_users")]
    pub top_n_users: usize,

    /// Seconds between change-processor passes.
    #[serde(default = "default_pass_interval_secs")]
    pub pass_interval_secs: u64,

    /// Seconds between user-similarity aggregator passes. Deliberately much
    /// coarser than the post pass; the aggregator is O(U²·P̄²).
    #[serde(default = "default_user_pass_interval_secs")]
    pub user_pass_interval_secs: u64,

    /// Seconds between prunes of already-processed CDC rows.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl KindredConfig {
    /// Resolve the effective data directory, falling back to the platform
    /// default when the config leaves it unset.
    pub fn data_dir(&self) -> EngineResult<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::default_data_dir().map_err(|e| EngineError::Config(e.to_string())),
        }
    }
}

/// Loads the engine configuration from a YAML file.
///
/// Reads the file at the given path, parses it as YAML, and constructs a
/// `KindredConfig` from it. Fields with defaults (weights, top-N sizes,
/// cadences) may be omitted from the file.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Returns
///
/// - `Ok(KindredConfig)`: The loaded configuration.
/// - `Err(EngineError::Config)`: The file could not be read or parsed.
///
/// # Examples
///
/// ```no_run
/// use kindred::config::load_config;
///
/// match load_config("/path/to/config.yaml") {
///     Ok(config) => println!("{:?}", config),
///     Err(err) => eprintln!("Error loading config: {}", err),
/// }
/// ```
pub fn load_config(file: &str) -> EngineResult<KindredConfig> {
    let content =
        fs::read_to_string(file).map_err(|e| EngineError::Config(format!("{file}: {e}")))?;
    let config: KindredConfig =
        serde_yaml::from_str(&content).map_err(|e| EngineError::Config(format!("{file}: {e}")))?;
    Ok(config)
}
