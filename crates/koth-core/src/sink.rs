//! Lifecycle notifications emitted by the capture engine.
//!
//! The engine reports what happened to an [`EventSink`]; turning that into
//! chat lines, action bars or reward chests is the host's business. Sink
//! calls are made after the contest lock is released, from the contest's own
//! tick task, so a slow sink only delays the contest it is reporting on.
//! Hosts that need strict non-blocking delivery can use [`ChannelSink`] and
//! consume [`ContestEvent`]s on their own task.

use koth_types::{ActorId, Position};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// The actor that won a contest and where its reward goes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Winner {
    /// Winning actor.
    pub actor: ActorId,
    /// Reward location of the contest at the moment it was won.
    pub reward_location: Position,
}

/// Consumer of contest lifecycle notifications.
pub trait EventSink: Send + Sync {
    /// A contest became active.
    fn on_started(&self, contest: &str);

    /// A lone occupant became the holder.
    fn on_capture_started(&self, contest: &str, actor: ActorId);

    /// The holder lost the zone (left, was joined, or disconnected).
    fn on_capture_interrupted(&self, contest: &str, previous: ActorId);

    /// Periodic remaining-time broadcast.
    fn on_progress(&self, contest: &str, holder: ActorId, remaining_seconds: u32);

    /// Per-tick progress update addressed to the holder only.
    fn on_holder_progress(&self, contest: &str, actor: ActorId, fraction: f64, remaining_seconds: u32);

    /// A contest became inactive. `winner` is set only when the countdown
    /// reached zero.
    fn on_ended(&self, contest: &str, winner: Option<&Winner>);
}

/// A lifecycle notification as a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContestEvent {
    /// See [`EventSink::on_started`].
    Started {
        /// Contest name.
        contest: String,
    },
    /// See [`EventSink::on_capture_started`].
    CaptureStarted {
        /// Contest name.
        contest: String,
        /// New holder.
        actor: ActorId,
    },
    /// See [`EventSink::on_capture_interrupted`].
    CaptureInterrupted {
        /// Contest name.
        contest: String,
        /// Holder that lost the zone.
        previous: ActorId,
    },
    /// See [`EventSink::on_progress`].
    Progress {
        /// Contest name.
        contest: String,
        /// Current holder.
        holder: ActorId,
        /// Seconds left.
        remaining_seconds: u32,
    },
    /// See [`EventSink::on_holder_progress`].
    HolderProgress {
        /// Contest name.
        contest: String,
        /// Current holder.
        actor: ActorId,
        /// Completed share, `0.0..1.0`.
        fraction: f64,
        /// Seconds left.
        remaining_seconds: u32,
    },
    /// See [`EventSink::on_ended`].
    Ended {
        /// Contest name.
        contest: String,
        /// Winner, when the countdown reached zero.
        winner: Option<Winner>,
    },
}

impl ContestEvent {
    /// Name of the contest the event is about.
    pub fn contest(&self) -> &str {
        match self {
            Self::Started { contest }
            | Self::CaptureStarted { contest, .. }
            | Self::CaptureInterrupted { contest, .. }
            | Self::Progress { contest, .. }
            | Self::HolderProgress { contest, .. }
            | Self::Ended { contest, .. } => contest,
        }
    }

    /// Hand the event to the matching sink method.
    pub fn deliver(&self, sink: &dyn EventSink) {
        match self {
            Self::Started { contest } => sink.on_started(contest),
            Self::CaptureStarted { contest, actor } => sink.on_capture_started(contest, *actor),
            Self::CaptureInterrupted { contest, previous } => {
                sink.on_capture_interrupted(contest, *previous);
            }
            Self::Progress {
                contest,
                holder,
                remaining_seconds,
            } => sink.on_progress(contest, *holder, *remaining_seconds),
            Self::HolderProgress {
                contest,
                actor,
                fraction,
                remaining_seconds,
            } => sink.on_holder_progress(contest, *actor, *fraction, *remaining_seconds),
            Self::Ended { contest, winner } => sink.on_ended(contest, winner.as_ref()),
        }
    }
}

/// Sink that forwards every notification into an unbounded channel.
///
/// Sending never blocks; if the receiver is gone the event is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ContestEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ContestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ContestEvent) {
        if self.tx.send(event).is_err() {
            debug!("Contest event dropped: receiver closed");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_started(&self, contest: &str) {
        self.send(ContestEvent::Started {
            contest: contest.to_owned(),
        });
    }

    fn on_capture_started(&self, contest: &str, actor: ActorId) {
        self.send(ContestEvent::CaptureStarted {
            contest: contest.to_owned(),
            actor,
        });
    }

    fn on_capture_interrupted(&self, contest: &str, previous: ActorId) {
        self.send(ContestEvent::CaptureInterrupted {
            contest: contest.to_owned(),
            previous,
        });
    }

    fn on_progress(&self, contest: &str, holder: ActorId, remaining_seconds: u32) {
        self.send(ContestEvent::Progress {
            contest: contest.to_owned(),
            holder,
            remaining_seconds,
        });
    }

    fn on_holder_progress(&self, contest: &str, actor: ActorId, fraction: f64, remaining_seconds: u32) {
        self.send(ContestEvent::HolderProgress {
            contest: contest.to_owned(),
            actor,
            fraction,
            remaining_seconds,
        });
    }

    fn on_ended(&self, contest: &str, winner: Option<&Winner>) {
        self.send(ContestEvent::Ended {
            contest: contest.to_owned(),
            winner: winner.cloned(),
        });
    }
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_started(&self, contest: &str) {
        info!(contest, "Contest started");
    }

    fn on_capture_started(&self, contest: &str, actor: ActorId) {
        info!(contest, %actor, "Capture started");
    }

    fn on_capture_interrupted(&self, contest: &str, previous: ActorId) {
        info!(contest, %previous, "Capture interrupted");
    }

    fn on_progress(&self, contest: &str, holder: ActorId, remaining_seconds: u32) {
        info!(contest, %holder, remaining_seconds, "Capture progress");
    }

    fn on_holder_progress(&self, contest: &str, actor: ActorId, fraction: f64, remaining_seconds: u32) {
        debug!(contest, %actor, fraction, remaining_seconds, "Holder progress");
    }

    fn on_ended(&self, contest: &str, winner: Option<&Winner>) {
        info!(contest, winner = ?winner.map(|w| w.actor), "Contest ended");
    }
}
