//! Capture state machine, tick loops, and daily scheduler for King of the
//! Hill contests.
//!
//! A contest is a named zone that an actor captures by being its only
//! occupant for an uninterrupted countdown. This crate owns the rules and
//! the timing; geometry, persistence, presentation, and rewards are reached
//! through injected collaborators.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `koth-config.yaml` into
//!   strongly-typed structs.
//! - [`contest`] -- A single contest and its single-holder capture rules.
//! - [`engine`] -- [`CaptureEngine`]: the contest registry and one tick loop
//!   per active contest.
//! - [`oracle`] -- [`OccupancyOracle`] trait and [`InMemoryOracle`].
//! - [`reward`] -- Reward dispatch for winners and the reward command table.
//! - [`schedule`] -- [`ScheduleEngine`]: minute-aligned daily auto-starts.
//! - [`sink`] -- [`EventSink`] trait, [`ContestEvent`], and stock sinks.
//! - [`store`] -- Persistence traits and [`MemoryStore`].
//!
//! [`CaptureEngine`]: engine::CaptureEngine
//! [`OccupancyOracle`]: oracle::OccupancyOracle
//! [`InMemoryOracle`]: oracle::InMemoryOracle
//! [`ScheduleEngine`]: schedule::ScheduleEngine
//! [`EventSink`]: sink::EventSink
//! [`ContestEvent`]: sink::ContestEvent
//! [`MemoryStore`]: store::MemoryStore

pub mod config;
pub mod contest;
pub mod engine;
pub mod oracle;
pub mod reward;
pub mod schedule;
pub mod sink;
pub mod store;
