//! Durable record types shared between the engine and its stores.
//!
//! These structs describe what survives a restart: the immutable parts of a
//! contest and the schedule configuration. Runtime capture state (active
//! flag, holder, countdown) is deliberately absent.

use serde::{Deserialize, Serialize};

/// A point in a named world, with facing.
///
/// Used as the reward location of a contest and as an actor position
/// reported by the occupancy oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Name of the world the point lives in.
    pub world: String,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// Horizontal facing in degrees.
    #[serde(default)]
    pub yaw: f32,
    /// Vertical facing in degrees.
    #[serde(default)]
    pub pitch: f32,
}

impl Position {
    /// Create a position with zero facing.
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }
}

/// Handle to an externally-owned region.
///
/// The engine never inspects the geometry behind it; it only passes the
/// handle back to the occupancy oracle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZoneRef {
    /// Identifier of the region in the external region service.
    pub region: String,
    /// World the region belongs to.
    pub world: String,
}

impl ZoneRef {
    /// Create a zone handle.
    pub fn new(region: impl Into<String>, world: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            world: world.into(),
        }
    }
}

impl core::fmt::Display for ZoneRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.world, self.region)
    }
}

/// Durable fields of a contest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContestRecord {
    /// Contest name as it was created (lookups are case-insensitive).
    pub name: String,
    /// Region the contest is fought over.
    pub zone: ZoneRef,
    /// Where the reward materialises on a win.
    pub reward_location: Position,
    /// Uninterrupted hold time required to win.
    pub capture_duration_seconds: u32,
}

/// Durable schedule configuration.
///
/// Times are kept as the `HH:MM` strings the operator entered; the schedule
/// engine validates them when loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// Whether scheduled auto-starts are enabled.
    pub enabled: bool,
    /// IANA time zone name used to interpret `times`.
    pub timezone: String,
    /// Wall-clock start times, `HH:MM`, 24-hour.
    #[serde(default)]
    pub times: Vec<String>,
}
