//! Error types for the daemon binary.
//!
//! [`EngineError`] wraps every startup and shutdown failure so `main` can
//! propagate it with `?`.

/// Top-level error for the daemon.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: koth_core::config::ConfigError,
    },

    /// The data file could not be opened or written.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: koth_core::store::StoreError,
    },

    /// Loading or shutting down contests failed.
    #[error("contest error: {source}")]
    Contest {
        /// The underlying contest error.
        #[from]
        source: koth_core::engine::ContestError,
    },

    /// Loading the schedule failed.
    #[error("schedule error: {source}")]
    Schedule {
        /// The underlying schedule error.
        #[from]
        source: koth_core::schedule::ScheduleError,
    },

    /// Loading the reward commands failed.
    #[error("reward error: {source}")]
    Reward {
        /// The underlying reward error.
        #[from]
        source: koth_core::reward::RewardError,
    },
}
