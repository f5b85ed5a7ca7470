//! Shared type definitions for the King of the Hill capture engine.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for actor identities
//! - [`structs`] -- Positions, zone handles, and the durable contest and
//!   schedule records

pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use ids::ActorId;
pub use structs::{ContestRecord, Position, ScheduleRecord, ZoneRef};
