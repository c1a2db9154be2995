//! Main module for the Kindred similarity engine CLI.
//!
//! This module provides the main function and the command entry points. It
//! handles command parsing, configuration loading, and dispatch into the
//! engine: full initialization, single maintenance passes, the periodic
//! scheduler, and the small read-side helpers.
//!
//! # Examples
//!
//! Building the engine state over the full corpus:
//!
//! ```sh
//! kindred init
//! ```
//!
//! Running the periodic scheduler:
//!
//! ```sh
//! kindred run
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use std::error::Error;
use std::{env, time::Duration};
use tracing::{debug, error, info, warn};

use kindred::cache::{self, NeighborCache, RedisCache};
use kindred::commands;
use kindred::config::{self, KindredConfig};
use kindred::embedding::BertEncoder;
use kindred::processor::ChangeProcessor;
use kindred::publish::NeighborPublisher;
use kindred::source::DieselChangeSource;
use kindred::state::EngineState;
use kindred::users::UserSimilarityAggregator;
use kindred::{config_dir, error::EngineResult};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Main asynchronous function of the Kindred CLI.
///
/// Loads the configuration, parses command-line arguments, and executes the
/// appropriate command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the invoked
/// command fails.
async fn run() -> Result<(), Box<dyn Error>> {
    let config_path = if env::var("IN_TEST_ENVIRONMENT").is_ok() {
        // In a test environment, load the config from the working directory.
        env::current_dir()?.join("config.yaml")
    } else {
        config_dir()?.join("config.yaml")
    };
    debug!("Loading config from: {}", config_path.display());
    let config = config::load_config(
        config_path
            .to_str()
            .ok_or("config path is not valid UTF-8")?,
    )?;
    let cli = commands::Cli::parse();

    match cli.command {
        commands::Commands::Init => init(&config)?,
        commands::Commands::Pass => pass(&config)?,
        commands::Commands::Users => users(&config)?,
        commands::Commands::Run => scheduler(&config).await?,
        commands::Commands::Neighbors { kind, id } => {
            let mut cache = RedisCache::connect(&config.redis_url)?;
            let list = cache::read_neighbors(&mut cache, kind.into(), &id);
            println!("{}", list.join(","));
        }
        commands::Commands::Score { a, b } => {
            score(&config, &a, &b)?;
        }
    }

    Ok(())
}

/// Builds the full engine state from scratch and publishes every post's
/// neighbor list.
fn init(config: &KindredConfig) -> EngineResult<()> {
    let mut source = DieselChangeSource::connect(&config.database_url)?;
    let posts = source.fetch_all_posts()?;
    info!(posts = posts.len(), "building engine state from full corpus");

    let encoder = BertEncoder::load()?;
    let state = EngineState::initialize(posts, &encoder)?;
    let data_dir = config.data_dir()?;
    state.save(&data_dir)?;

    let mut cache = RedisCache::connect(&config.redis_url)?;
    // Posts deleted while the engine was offline have no surviving row to
    // trigger a key delete; sweep all published lists before republishing.
    cache.clear()?;
    let publisher = NeighborPublisher::from_config(config);
    publisher.publish(
        &state.ordered_ids(),
        &state.lexical_matrix,
        &state.semantic_matrix,
        &mut cache,
    )?;
    Ok(())
}

/// Runs a single change-processor pass and persists the patched state.
fn pass(config: &KindredConfig) -> EngineResult<()> {
    let data_dir = config.data_dir()?;
    let mut state = EngineState::load(&data_dir)?;
    let mut source = DieselChangeSource::connect(&config.database_url)?;
    let mut cache = RedisCache::connect(&config.redis_url)?;

    let encoder = BertEncoder::load()?;
    let processor = ChangeProcessor::new(&encoder, NeighborPublisher::from_config(config));
    let outcome = processor.run_pass(&mut state, &mut source, &mut cache);
    if outcome.total() > 0 {
        state.save(&data_dir)?;
    }
    Ok(())
}

/// Recomputes and publishes every similar-user list once.
fn users(config: &KindredConfig) -> EngineResult<()> {
    let data_dir = config.data_dir()?;
    let state = EngineState::load(&data_dir)?;
    let mut source = DieselChangeSource::connect(&config.database_url)?;
    let post_owner = source.post_user_mapping()?;
    let follows = source.user_followings_map()?;

    let mut cache = RedisCache::connect(&config.redis_url)?;
    let aggregator = UserSimilarityAggregator::from_config(config);
    aggregator.recompute(
        &state.lexical_matrix,
        &state.semantic_matrix,
        &post_owner,
        &follows,
        &mut cache,
    )?;
    Ok(())
}

/// Prints the combined similarity score between two indexed posts.
fn score(config: &KindredConfig, a: &str, b: &str) -> EngineResult<()> {
    let state = EngineState::load(&config.data_dir()?)?;
    match (
        state.lexical_matrix.get(a, b),
        state.semantic_matrix.get(a, b),
    ) {
        (Some(lex), Some(sem)) => {
            let combined = config.weight_lexical * lex + config.weight_semantic * sem;
            println!("{combined}");
        }
        _ => println!("no score: at least one of the posts is not indexed"),
    }
    Ok(())
}

/// Runs the periodic scheduler until the process is terminated.
///
/// One task drives three cadences through `select!`, so at most one pass of
/// any kind runs at a time; a slow pass delays the others rather than
/// overlapping them. The embedding model is loaded once and reused across
/// passes.
async fn scheduler(config: &KindredConfig) -> Result<(), Box<dyn Error>> {
    let encoder = BertEncoder::load()?;
    let data_dir = config.data_dir()?;
    let mut state = EngineState::load(&data_dir)?;
    let mut source = DieselChangeSource::connect(&config.database_url)?;
    let mut cache = RedisCache::connect(&config.redis_url)?;

    let processor = ChangeProcessor::new(&encoder, NeighborPublisher::from_config(config));
    let aggregator = UserSimilarityAggregator::from_config(config);

    let mut pass_tick = tokio::time::interval(Duration::from_secs(config.pass_interval_secs));
    let mut user_tick =
        tokio::time::interval(Duration::from_secs(config.user_pass_interval_secs));
    let mut prune_tick = tokio::time::interval(Duration::from_secs(config.prune_interval_secs));

    info!(
        pass_secs = config.pass_interval_secs,
        user_secs = config.user_pass_interval_secs,
        prune_secs = config.prune_interval_secs,
        "scheduler started"
    );
    loop {
        tokio::select! {
            _ = pass_tick.tick() => {
                let outcome = processor.run_pass(&mut state, &mut source, &mut cache);
                if outcome.total() > 0 {
                    if let Err(e) = state.save(&data_dir) {
                        error!(error = %e, "persisting engine state failed");
                    }
                }
            }
            _ = user_tick.tick() => {
                match (source.post_user_mapping(), source.user_followings_map()) {
                    (Ok(post_owner), Ok(follows)) => {
                        if let Err(e) = aggregator.recompute(
                            &state.lexical_matrix,
                            &state.semantic_matrix,
                            &post_owner,
                            &follows,
                            &mut cache,
                        ) {
                            error!(error = %e, "user-similarity pass failed");
                        }
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        error!(error = %e, "fetching membership maps failed");
                    }
                }
            }
            _ = prune_tick.tick() => {
                if let Err(e) = source.prune_processed() {
                    warn!(error = %e, "pruning processed change rows failed");
                }
            }
        }
    }
}
