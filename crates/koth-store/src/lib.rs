//! File persistence for the King of the Hill capture engine.
//!
//! Implements the [`ContestStore`], [`ScheduleStore`] and [`RewardStore`]
//! traits from `koth-core` on top of a single YAML data file. Only durable fields are
//! stored; contests always come back inactive.
//!
//! # Modules
//!
//! - [`yaml`] -- [`YamlStore`], the YAML data file backend.
//!
//! [`ContestStore`]: koth_core::store::ContestStore
//! [`ScheduleStore`]: koth_core::store::ScheduleStore
//! [`RewardStore`]: koth_core::store::RewardStore

pub mod yaml;

pub use yaml::YamlStore;
