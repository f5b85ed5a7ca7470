//! Occupancy oracle: answers "who is where" and "is this point in that zone".
//!
//! The capture engine never owns geometry. It asks an [`OccupancyOracle`]
//! for the actors in a zone's world and tests each position against the
//! zone handle. Production hosts back this with their region service; the
//! [`InMemoryOracle`] serves axis-aligned cuboids from configuration and is
//! what the tests use.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use koth_types::{ActorId, Position, ZoneRef};

use crate::config::ZoneConfig;

/// Errors an oracle can report while listing actors.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// The world is not loaded.
    #[error("world {world} is unavailable")]
    WorldUnavailable {
        /// Name of the missing world.
        world: String,
    },

    /// The backing region service failed.
    #[error("occupancy backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

/// Capability to locate actors and test positions against zones.
///
/// Implementations must answer quickly: the engine calls them once per tick
/// per active contest.
pub trait OccupancyOracle: Send + Sync {
    /// Whether `position` lies inside `zone`.
    fn contains(&self, zone: &ZoneRef, position: &Position) -> bool;

    /// Every actor currently present in `world`, with its position.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] if the world cannot be queried.
    fn actors_in_world(&self, world: &str) -> Result<Vec<(ActorId, Position)>, OracleError>;

    /// Whether the zone handle still resolves to a region.
    fn zone_exists(&self, zone: &ZoneRef) -> bool;
}

/// Actors inside `zone`, in the order the oracle reported them.
///
/// # Errors
///
/// Propagates the oracle's [`OracleError`].
pub fn occupants(oracle: &dyn OccupancyOracle, zone: &ZoneRef) -> Result<Vec<ActorId>, OracleError> {
    Ok(oracle
        .actors_in_world(&zone.world)?
        .into_iter()
        .filter(|(_, position)| oracle.contains(zone, position))
        .map(|(actor, _)| actor)
        .collect())
}

/// An axis-aligned box, inclusive on every face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cuboid {
    min: [f64; 3],
    max: [f64; 3],
}

impl Cuboid {
    /// Build a cuboid from two arbitrary opposite corners.
    pub fn from_corners(a: [f64; 3], b: [f64; 3]) -> Self {
        let [ax, ay, az] = a;
        let [bx, by, bz] = b;
        Self {
            min: [ax.min(bx), ay.min(by), az.min(bz)],
            max: [ax.max(bx), ay.max(by), az.max(bz)],
        }
    }

    /// Whether the point lies inside the box.
    pub fn contains(&self, x: f64, y: f64, z: f64) -> bool {
        let [min_x, min_y, min_z] = self.min;
        let [max_x, max_y, max_z] = self.max;
        (min_x..=max_x).contains(&x) && (min_y..=max_y).contains(&y) && (min_z..=max_z).contains(&z)
    }
}

#[derive(Debug, Default)]
struct OracleState {
    zones: BTreeMap<ZoneRef, Cuboid>,
    actors: BTreeMap<ActorId, Position>,
}

/// Oracle backed by in-process cuboids and a position table.
///
/// The host updates positions with [`set_position`](Self::set_position) and
/// removes actors on disconnect with [`remove_actor`](Self::remove_actor).
#[derive(Debug, Default)]
pub struct InMemoryOracle {
    state: RwLock<OracleState>,
}

impl InMemoryOracle {
    /// Create an oracle with no zones and no actors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an oracle serving the configured zones.
    pub fn from_zones(zones: &[ZoneConfig]) -> Self {
        let oracle = Self::new();
        for zone in zones {
            oracle.define_zone(
                ZoneRef::new(zone.region.clone(), zone.world.clone()),
                Cuboid::from_corners(zone.min, zone.max),
            );
        }
        oracle
    }

    /// Add or replace a zone.
    pub fn define_zone(&self, zone: ZoneRef, cuboid: Cuboid) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.zones.insert(zone, cuboid);
    }

    /// Remove a zone. Returns whether it existed.
    pub fn remove_zone(&self, zone: &ZoneRef) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.zones.remove(zone).is_some()
    }

    /// Record an actor's current position.
    pub fn set_position(&self, actor: ActorId, position: Position) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.actors.insert(actor, position);
    }

    /// Forget an actor. Returns whether it was known.
    pub fn remove_actor(&self, actor: ActorId) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.actors.remove(&actor).is_some()
    }

    /// Number of zones served.
    pub fn zone_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .zones
            .len()
    }
}

impl OccupancyOracle for InMemoryOracle {
    fn contains(&self, zone: &ZoneRef, position: &Position) -> bool {
        if position.world != zone.world {
            return false;
        }
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .zones
            .get(zone)
            .is_some_and(|cuboid| cuboid.contains(position.x, position.y, position.z))
    }

    fn actors_in_world(&self, world: &str) -> Result<Vec<(ActorId, Position)>, OracleError> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .actors
            .iter()
            .filter(|(_, position)| position.world == world)
            .map(|(actor, position)| (*actor, position.clone()))
            .collect())
    }

    fn zone_exists(&self, zone: &ZoneRef) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .zones
            .contains_key(zone)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn hill() -> ZoneRef {
        ZoneRef::new("hill1", "world")
    }

    fn make_oracle() -> InMemoryOracle {
        let oracle = InMemoryOracle::new();
        oracle.define_zone(hill(), Cuboid::from_corners([10.0, 70.0, 10.0], [0.0, 60.0, 0.0]));
        oracle
    }

    #[test]
    fn cuboid_sorts_corners_and_is_inclusive() {
        let cuboid = Cuboid::from_corners([10.0, 70.0, 10.0], [0.0, 60.0, 0.0]);
        assert!(cuboid.contains(0.0, 60.0, 0.0));
        assert!(cuboid.contains(10.0, 70.0, 10.0));
        assert!(cuboid.contains(5.0, 65.0, 5.0));
        assert!(!cuboid.contains(10.5, 65.0, 5.0));
    }

    #[test]
    fn contains_rejects_other_worlds() {
        let oracle = make_oracle();
        assert!(oracle.contains(&hill(), &Position::new("world", 5.0, 65.0, 5.0)));
        assert!(!oracle.contains(&hill(), &Position::new("nether", 5.0, 65.0, 5.0)));
    }

    #[test]
    fn unknown_zone_contains_nothing() {
        let oracle = make_oracle();
        let other = ZoneRef::new("missing", "world");
        assert!(!oracle.contains(&other, &Position::new("world", 5.0, 65.0, 5.0)));
        assert!(!oracle.zone_exists(&other));
        assert!(oracle.zone_exists(&hill()));
    }

    #[test]
    fn occupants_filters_by_world_and_zone() {
        let oracle = make_oracle();
        let inside = ActorId::new();
        let outside = ActorId::new();
        let elsewhere = ActorId::new();
        oracle.set_position(inside, Position::new("world", 1.0, 61.0, 1.0));
        oracle.set_position(outside, Position::new("world", 50.0, 61.0, 1.0));
        oracle.set_position(elsewhere, Position::new("nether", 1.0, 61.0, 1.0));

        let found = occupants(&oracle, &hill()).unwrap();
        assert_eq!(found, vec![inside]);
    }

    #[test]
    fn removed_actor_is_no_longer_reported() {
        let oracle = make_oracle();
        let actor = ActorId::new();
        oracle.set_position(actor, Position::new("world", 1.0, 61.0, 1.0));
        assert!(oracle.remove_actor(actor));
        assert!(occupants(&oracle, &hill()).unwrap().is_empty());
        assert!(!oracle.remove_actor(actor));
    }

    #[test]
    fn from_zones_builds_every_configured_zone() {
        let zones = vec![
            ZoneConfig {
                region: String::from("a"),
                world: String::from("world"),
                min: [0.0, 0.0, 0.0],
                max: [1.0, 1.0, 1.0],
            },
            ZoneConfig {
                region: String::from("b"),
                world: String::from("world"),
                min: [5.0, 5.0, 5.0],
                max: [6.0, 6.0, 6.0],
            },
        ];
        let oracle = InMemoryOracle::from_zones(&zones);
        assert_eq!(oracle.zone_count(), 2);
        assert!(oracle.remove_zone(&ZoneRef::new("a", "world")));
        assert_eq!(oracle.zone_count(), 1);
    }
}
