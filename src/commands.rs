//! This module defines the command-line interface for the engine using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line
//! arguments, and a `Commands` enum that represents the available
//! subcommands and their options.
//!
//! # Examples
//!
//! Parsing command-line arguments:
//!
//! ```no_run
//! use clap::Parser;
//! use kindred::commands::Cli;
//!
//! let cli = Cli::parse();
//! ```

use clap::{Parser, Subcommand, ValueEnum};

use crate::cache::NeighborKind;

/// Represents the parsed command-line arguments.
///
/// This struct is constructed by parsing the command-line arguments using
/// `clap`. It contains a `command` field that holds the parsed subcommand
/// and its options.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Build the engine state from scratch over the full post corpus.
    ///
    /// Refits the lexical vocabulary, computes both similarity matrices,
    /// fits the normalizer bounds, persists everything to the data
    /// directory, and publishes neighbor lists for every post. This is the
    /// only command that refits; all later maintenance is incremental.
    Init,

    /// Run one change-processor pass over the unprocessed change logs.
    #[clap(name = "pass", alias = "p")]
    Pass,

    /// Recompute and publish every user's similar-user list.
    #[clap(name = "users", alias = "u")]
    Users,

    /// Run the periodic scheduler: change passes, user-similarity passes,
    /// and change-log pruning, each on its own configured cadence.
    Run,

    /// Print a published neighbor list straight from the cache.
    Neighbors {
        /// Which index to read from.
        #[arg(value_enum)]
        kind: NeighborKindArg,

        /// The post or user ID to look up.
        id: String,
    },

    /// Print the combined similarity score between two indexed posts.
    Score {
        /// First post ID.
        a: String,

        /// Second post ID.
        b: String,
    },
}

/// CLI-facing spelling of the two neighbor indexes.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NeighborKindArg {
    Post,
    User,
}

impl From<NeighborKindArg> for NeighborKind {
    fn from(arg: NeighborKindArg) -> Self {
        match arg {
            NeighborKindArg::Post => NeighborKind::Post,
            NeighborKindArg::User => NeighborKind::User,
        }
    }
}
