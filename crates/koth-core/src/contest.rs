//! A single contest: durable definition plus runtime capture state.
//!
//! The transitions here are pure. They take the occupants observed for a
//! tick and report what changed; the [`engine`](crate::engine) decides when
//! to call them, under which lock, and which events to emit.
//!
//! # Invariants
//!
//! - `holder.is_some()` implies `active`.
//! - `remaining_seconds` is in `0..=capture_duration_seconds`, and is 0
//!   whenever the contest is inactive.
//! - While a holder exists the countdown drops by exactly one per call to
//!   [`Contest::advance`]; any holder change resets it to the full duration.

use koth_types::{ActorId, ContestRecord, Position, ZoneRef};

/// Result of re-evaluating who holds the zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderChange {
    /// A lone occupant became the holder. `previous` is set when it replaced
    /// another holder between two evaluations.
    Acquired {
        /// The new holder.
        actor: ActorId,
        /// The holder it replaced, if any.
        previous: Option<ActorId>,
    },
    /// The zone became empty or contested and the holder was cleared.
    Interrupted {
        /// The holder that lost the zone.
        previous: ActorId,
    },
}

/// Result of advancing the countdown by one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Advance {
    /// Nobody holds the zone; the countdown did not move.
    Idle,
    /// The holder made progress but has not won yet.
    Progress {
        /// Current holder.
        holder: ActorId,
        /// Seconds left after this tick.
        remaining_seconds: u32,
        /// Completed share of the capture, `0.0..1.0`.
        fraction: f64,
        /// Whether this tick lands on a remaining-time broadcast.
        broadcast: bool,
    },
    /// The countdown reached zero.
    Captured {
        /// The winner.
        holder: ActorId,
    },
}

/// One named capturable zone and its runtime capture state.
#[derive(Debug, Clone, PartialEq)]
pub struct Contest {
    name: String,
    zone: ZoneRef,
    reward_location: Position,
    capture_duration_seconds: u32,
    active: bool,
    holder: Option<ActorId>,
    remaining_seconds: u32,
}

impl Contest {
    /// Create an inactive contest.
    pub const fn new(
        name: String,
        zone: ZoneRef,
        reward_location: Position,
        capture_duration_seconds: u32,
    ) -> Self {
        Self {
            name,
            zone,
            reward_location,
            capture_duration_seconds,
            active: false,
            holder: None,
            remaining_seconds: 0,
        }
    }

    /// Rebuild an inactive contest from its durable record.
    pub fn from_record(record: ContestRecord) -> Self {
        Self::new(
            record.name,
            record.zone,
            record.reward_location,
            record.capture_duration_seconds,
        )
    }

    /// Durable fields of this contest.
    pub fn to_record(&self) -> ContestRecord {
        ContestRecord {
            name: self.name.clone(),
            zone: self.zone.clone(),
            reward_location: self.reward_location.clone(),
            capture_duration_seconds: self.capture_duration_seconds,
        }
    }

    /// Contest name as created.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Region handle the contest is fought over.
    pub const fn zone(&self) -> &ZoneRef {
        &self.zone
    }

    /// Where the reward materialises.
    pub const fn reward_location(&self) -> &Position {
        &self.reward_location
    }

    /// Configured hold time.
    pub const fn capture_duration_seconds(&self) -> u32 {
        self.capture_duration_seconds
    }

    /// Whether a capture is running.
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Actor currently credited with the zone.
    pub const fn holder(&self) -> Option<ActorId> {
        self.holder
    }

    /// Seconds the current holder still needs.
    pub const fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub(crate) fn set_reward_location(&mut self, location: Position) {
        self.reward_location = location;
    }

    pub(crate) const fn set_capture_duration(&mut self, seconds: u32) {
        self.capture_duration_seconds = seconds;
    }

    /// Enter the active state with an empty zone and a full countdown.
    pub(crate) const fn begin(&mut self) {
        self.active = true;
        self.holder = None;
        self.remaining_seconds = self.capture_duration_seconds;
    }

    /// Leave the active state. Returns the holder at the moment of ending.
    pub(crate) const fn finish(&mut self) -> Option<ActorId> {
        let holder = self.holder.take();
        self.active = false;
        self.remaining_seconds = 0;
        holder
    }

    /// Apply the single-holder rule to the actors currently in the zone.
    ///
    /// Exactly one occupant holds the zone; zero or several occupants clear
    /// the holder. Every change resets the countdown.
    pub(crate) fn observe(&mut self, occupants: &[ActorId]) -> Option<HolderChange> {
        if !self.active {
            return None;
        }
        match occupants {
            [actor] => {
                if self.holder == Some(*actor) {
                    return None;
                }
                let previous = self.holder.replace(*actor);
                self.remaining_seconds = self.capture_duration_seconds;
                Some(HolderChange::Acquired {
                    actor: *actor,
                    previous,
                })
            }
            _ => {
                let previous = self.holder.take()?;
                self.remaining_seconds = self.capture_duration_seconds;
                Some(HolderChange::Interrupted { previous })
            }
        }
    }

    /// Clear the holder if it is `actor`, resetting the countdown.
    pub(crate) fn release(&mut self, actor: ActorId) -> bool {
        if !self.active || self.holder != Some(actor) {
            return false;
        }
        self.holder = None;
        self.remaining_seconds = self.capture_duration_seconds;
        true
    }

    /// Count one second for the holder, if any.
    ///
    /// `message_interval` of 0 disables broadcast marks.
    pub(crate) fn advance(&mut self, message_interval: u32) -> Advance {
        let Some(holder) = self.holder.filter(|_| self.active) else {
            return Advance::Idle;
        };
        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            return Advance::Captured { holder };
        }
        let broadcast = self
            .remaining_seconds
            .checked_rem(message_interval)
            .is_some_and(|rem| rem == 0);
        Advance::Progress {
            holder,
            remaining_seconds: self.remaining_seconds,
            fraction: self.progress_fraction(),
            broadcast,
        }
    }

    /// Completed share of the capture: `1 - remaining / duration`.
    pub fn progress_fraction(&self) -> f64 {
        if self.capture_duration_seconds == 0 {
            return 0.0;
        }
        let remaining = f64::from(self.remaining_seconds);
        let total = f64::from(self.capture_duration_seconds);
        (1.0 - remaining / total).clamp(0.0, 1.0)
    }
}
