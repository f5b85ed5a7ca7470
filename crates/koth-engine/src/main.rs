//! King of the Hill daemon.
//!
//! Wires the capture engine and the daily scheduler to a YAML data file, an
//! in-memory occupancy oracle built from the configured zones, and a
//! log-based announcer. It runs until Ctrl-C, then stops every contest
//! without rewards and flushes the data file.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `KOTH_CONFIG` or `koth-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Open the data file
//! 4. Build the oracle, announcer, and reward relay
//! 5. Load stored contests
//! 6. Load the schedule and start its driver
//! 7. Wait for Ctrl-C, then shut down

mod announce;
mod console;
mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use koth_core::config::{KothConfig, LoggingConfig};
use koth_core::engine::{CaptureEngine, EngineSettings};
use koth_core::oracle::InMemoryOracle;
use koth_core::reward::{CommandRewards, RewardRelay, RewardTable};
use koth_core::schedule::ScheduleEngine;
use koth_core::store::{ContestStore, RewardStore};
use koth_store::YamlStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::announce::Announcer;
use crate::console::ConsoleRunner;
use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "koth-config.yaml";

/// Application entry point for the daemon.
///
/// # Errors
///
/// Returns an error if any initialization step or the final flush fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("koth-engine starting");
    match &source {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Config file not found, using defaults"),
    }

    // 3. Open the data file.
    let store = Arc::new(
        YamlStore::open(&config.storage.data_file)
            .map_err(EngineError::from)
            .with_context(|| format!("opening data file {}", config.storage.data_file))?,
    );
    info!(path = %store.path().display(), "Data file ready");

    // 4. Collaborators.
    let oracle = Arc::new(InMemoryOracle::from_zones(&config.zones));
    info!(zones = oracle.zone_count(), "Occupancy oracle ready");

    let table = Arc::new(
        RewardTable::with_store(
            &config.rewards.commands,
            Arc::clone(&store) as Arc<dyn RewardStore>,
        )
        .map_err(EngineError::from)?,
    );
    info!(commands = table.commands().len(), "Reward commands ready");
    let rewards = Arc::new(CommandRewards::new(table, Arc::new(ConsoleRunner)));
    let sink = Arc::new(RewardRelay::new(
        Arc::new(Announcer::new(config.messages.clone())),
        rewards,
    ));

    // 5. Contests.
    let settings = EngineSettings::from_config(&config.settings);
    let capture = Arc::new(CaptureEngine::new(
        settings,
        oracle,
        sink,
        Arc::clone(&store) as Arc<dyn ContestStore>,
    ));
    capture.load().map_err(EngineError::from)?;
    info!(
        contests = capture.len(),
        capture_seconds = settings.default_capture_seconds,
        tick_interval_ms = config.settings.tick_interval_ms,
        "Capture engine ready"
    );

    // 6. Schedule.
    let schedule = Arc::new(ScheduleEngine::new(
        Arc::clone(&capture),
        store,
        &config.schedules,
    ));
    schedule.reload().map_err(EngineError::from)?;
    info!(
        enabled = schedule.is_enabled(),
        timezone = %schedule.timezone(),
        times = schedule.times().len(),
        "Schedule ready"
    );

    // 7. Run until interrupted.
    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutdown requested");

    schedule.stop();
    let saved = capture.shutdown().map_err(EngineError::from)?;
    info!(saved, "koth-engine stopped");
    Ok(())
}

/// Load configuration from `KOTH_CONFIG`, falling back to
/// `koth-config.yaml`, then to defaults when that file does not exist.
///
/// Returns the configuration and the file it came from.
fn load_config() -> Result<(KothConfig, Option<PathBuf>), EngineError> {
    let path = std::env::var_os("KOTH_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    load_config_from(&path)
}

fn load_config_from(path: &Path) -> Result<(KothConfig, Option<PathBuf>), EngineError> {
    if path.exists() {
        let config = KothConfig::from_file(path)?;
        Ok((config, Some(path.to_path_buf())))
    } else {
        let mut config = KothConfig::default();
        config.storage.apply_env_overrides();
        Ok((config, None))
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
