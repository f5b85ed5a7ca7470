//! Capture engine: contest registry, tick loops and the capture rules.
//!
//! Every registered contest lives in its own slot guarded by its own mutex,
//! so unrelated contests never contend. The name map is behind an `RwLock`
//! that is only held to look up or insert slots, never across a tick or a
//! sink call.
//!
//! Starting a contest spawns exactly one Tokio task that ticks it once per
//! `tick_interval`. Each tick:
//!
//! 1. asks the oracle which actors are inside the zone (no lock held);
//! 2. applies the single-holder rule under the contest lock;
//! 3. counts one second for the holder, declaring the winner at zero;
//! 4. releases the lock and hands the resulting events to the sink.
//!
//! Every start bumps a run counter. A tick that wakes up for a run that has
//! since ended (or restarted) sees the mismatch and stops without touching
//! anything, which is what makes [`CaptureEngine::end`] safe against a tick
//! already in flight.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use koth_types::{ActorId, Position, ZoneRef};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::SettingsConfig;
use crate::contest::{Advance, Contest, HolderChange};
use crate::oracle::{self, OccupancyOracle};
use crate::sink::{ContestEvent, EventSink, Winner};
use crate::store::{ContestStore, StoreError, name_key};

/// Errors returned by registry and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ContestError {
    /// No contest with this name is registered.
    #[error("contest {name} not found")]
    NotFound {
        /// The requested name.
        name: String,
    },

    /// A contest with this name (ignoring case) already exists.
    #[error("contest {name} already exists")]
    DuplicateName {
        /// The requested name.
        name: String,
    },

    /// The contest is already running.
    #[error("contest {name} is already active")]
    AlreadyActive {
        /// The contest name.
        name: String,
    },

    /// The change is not allowed while the contest is running.
    #[error("contest {name} is active")]
    ContestActive {
        /// The contest name.
        name: String,
    },

    /// A capture duration of zero seconds was requested.
    #[error("invalid capture duration for {name}: {seconds}s")]
    InvalidDuration {
        /// The contest name.
        name: String,
        /// The rejected value.
        seconds: u32,
    },

    /// A tick loop was requested outside a Tokio runtime.
    #[error("no Tokio runtime available to drive contest ticks")]
    NoRuntime,

    /// The persistence collaborator failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },
}

/// Engine timing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Hold time assigned to newly created contests.
    pub default_capture_seconds: u32,
    /// Remaining-time broadcasts fire when the countdown is a multiple of
    /// this value. Zero disables them.
    pub message_interval_seconds: u32,
    /// Real time between two ticks of one contest.
    pub tick_interval: Duration,
}

impl EngineSettings {
    /// Build the settings from the `settings` config section.
    pub fn from_config(config: &SettingsConfig) -> Self {
        Self {
            default_capture_seconds: config.capture_time_seconds.max(1),
            message_interval_seconds: config.message_interval_seconds,
            tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&SettingsConfig::default())
    }
}

/// Runtime state of one registered contest.
#[derive(Debug)]
struct SlotState {
    contest: Contest,
    /// Incremented on every start; ticks carry the value they were spawned with.
    run: u64,
    ticker: Option<JoinHandle<()>>,
    /// Set once the contest is deleted, so a racing start cannot revive it.
    removed: bool,
}

#[derive(Debug)]
struct Slot {
    name: String,
    zone: ZoneRef,
    state: Mutex<SlotState>,
}

impl Slot {
    fn new(contest: Contest) -> Self {
        Self {
            name: contest.name().to_owned(),
            zone: contest.zone().clone(),
            state: Mutex::new(SlotState {
                contest,
                run: 0,
                ticker: None,
                removed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What a tick loop needs, detached from the engine itself.
#[derive(Clone)]
struct TickContext {
    oracle: Arc<dyn OccupancyOracle>,
    sink: Arc<dyn EventSink>,
    message_interval: u32,
}

enum TickFlow {
    Continue,
    Stop,
}

/// Owns every contest and drives the active ones.
pub struct CaptureEngine {
    settings: EngineSettings,
    oracle: Arc<dyn OccupancyOracle>,
    sink: Arc<dyn EventSink>,
    store: Arc<dyn ContestStore>,
    contests: RwLock<BTreeMap<String, Arc<Slot>>>,
}

impl core::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("settings", &self.settings)
            .field("contests", &self.len())
            .finish_non_exhaustive()
    }
}

impl CaptureEngine {
    /// Create an empty engine wired to its collaborators.
    pub fn new(
        settings: EngineSettings,
        oracle: Arc<dyn OccupancyOracle>,
        sink: Arc<dyn EventSink>,
        store: Arc<dyn ContestStore>,
    ) -> Self {
        Self {
            settings,
            oracle,
            sink,
            store,
            contests: RwLock::new(BTreeMap::new()),
        }
    }

    /// Engine timing settings.
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Register every stored contest as inactive.
    ///
    /// Records with a zero duration, a zone the oracle no longer knows, or a
    /// name that duplicates an earlier record are skipped with a warning.
    /// Returns the number of contests registered.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::Store`] if the store cannot be read at all.
    pub fn load(&self) -> Result<usize, ContestError> {
        let records = self.store.load_all_contests()?;
        let mut map = self.write_map();
        let mut loaded: usize = 0;

        for record in records {
            if record.capture_duration_seconds == 0 {
                warn!(contest = %record.name, "Skipping stored contest with zero capture duration");
                continue;
            }
            if !self.oracle.zone_exists(&record.zone) {
                warn!(contest = %record.name, zone = %record.zone, "Skipping stored contest: zone no longer exists");
                continue;
            }
            let key = name_key(&record.name);
            if map.contains_key(&key) {
                warn!(contest = %record.name, "Skipping duplicate stored contest");
                continue;
            }
            map.insert(key, Arc::new(Slot::new(Contest::from_record(record))));
            loaded = loaded.saturating_add(1);
        }

        info!(loaded, "Contests loaded");
        Ok(loaded)
    }

    /// Register and persist a new inactive contest.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::DuplicateName`] if the name is taken (ignoring
    /// case), or [`ContestError::Store`] if it cannot be persisted, in which
    /// case nothing is registered.
    pub fn create(
        &self,
        name: &str,
        zone: ZoneRef,
        reward_location: Position,
    ) -> Result<Contest, ContestError> {
        let key = name_key(name);
        let mut map = self.write_map();
        if map.contains_key(&key) {
            return Err(ContestError::DuplicateName {
                name: name.to_owned(),
            });
        }

        let contest = Contest::new(
            name.to_owned(),
            zone,
            reward_location,
            self.settings.default_capture_seconds,
        );
        self.store.save_contest(&contest.to_record())?;
        map.insert(key, Arc::new(Slot::new(contest.clone())));

        info!(contest = name, zone = %contest.zone(), "Contest created");
        Ok(contest)
    }

    /// Remove an inactive contest and its stored record.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::NotFound`], [`ContestError::ContestActive`],
    /// or [`ContestError::Store`] (the contest stays registered).
    pub fn delete(&self, name: &str) -> Result<(), ContestError> {
        let key = name_key(name);
        let mut map = self.write_map();
        let slot = map.get(&key).cloned().ok_or_else(|| ContestError::NotFound {
            name: name.to_owned(),
        })?;

        {
            let mut state = slot.lock();
            if state.contest.is_active() {
                return Err(ContestError::ContestActive {
                    name: slot.name.clone(),
                });
            }
            self.store.delete_contest(&slot.name)?;
            state.removed = true;
            if let Some(stale) = state.ticker.take() {
                stale.abort();
            }
        }

        map.remove(&key);
        info!(contest = %slot.name, "Contest deleted");
        Ok(())
    }

    /// Snapshot of one contest.
    pub fn get(&self, name: &str) -> Option<Contest> {
        self.find(name).map(|slot| slot.lock().contest.clone())
    }

    /// Snapshot of every contest, ordered by lowercase name.
    pub fn list(&self) -> Vec<Contest> {
        self.slots()
            .iter()
            .map(|slot| slot.lock().contest.clone())
            .collect()
    }

    /// Names of every contest not currently running.
    pub fn inactive_names(&self) -> Vec<String> {
        self.slots()
            .iter()
            .filter(|slot| !slot.lock().contest.is_active())
            .map(|slot| slot.name.clone())
            .collect()
    }

    /// Number of registered contests.
    pub fn len(&self) -> usize {
        self.contests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no contest is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of running contests.
    pub fn active_count(&self) -> usize {
        self.slots()
            .iter()
            .filter(|slot| slot.lock().contest.is_active())
            .count()
    }

    /// Move the reward location of an inactive contest.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::NotFound`], [`ContestError::ContestActive`],
    /// or [`ContestError::Store`] (the old location is kept).
    pub fn set_reward_location(&self, name: &str, location: Position) -> Result<(), ContestError> {
        let slot = self.slot(name)?;
        let mut state = slot.lock();
        if state.contest.is_active() {
            return Err(ContestError::ContestActive {
                name: slot.name.clone(),
            });
        }

        let mut updated = state.contest.clone();
        updated.set_reward_location(location);
        self.store.save_contest(&updated.to_record())?;
        state.contest = updated;

        info!(contest = %slot.name, "Reward location updated");
        Ok(())
    }

    /// Change the hold time of an inactive contest.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::InvalidDuration`] for zero,
    /// [`ContestError::NotFound`], [`ContestError::ContestActive`], or
    /// [`ContestError::Store`].
    pub fn set_capture_duration(&self, name: &str, seconds: u32) -> Result<(), ContestError> {
        if seconds == 0 {
            return Err(ContestError::InvalidDuration {
                name: name.to_owned(),
                seconds,
            });
        }
        let slot = self.slot(name)?;
        let mut state = slot.lock();
        if state.contest.is_active() {
            return Err(ContestError::ContestActive {
                name: slot.name.clone(),
            });
        }

        let mut updated = state.contest.clone();
        updated.set_capture_duration(seconds);
        self.store.save_contest(&updated.to_record())?;
        state.contest = updated;

        info!(contest = %slot.name, seconds, "Capture duration updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Activate a contest and spawn its tick loop.
    ///
    /// Manual and scheduled starts both come through here; the per-contest
    /// lock guarantees at most one of any concurrent starts succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::NotFound`], [`ContestError::AlreadyActive`], or
    /// [`ContestError::NoRuntime`] when called outside a Tokio runtime.
    pub fn start(&self, name: &str) -> Result<(), ContestError> {
        let slot = self.slot(name)?;
        let runtime = Handle::try_current().map_err(|_err| ContestError::NoRuntime)?;

        {
            let mut state = slot.lock();
            if state.removed {
                return Err(ContestError::NotFound {
                    name: name.to_owned(),
                });
            }
            if state.contest.is_active() {
                return Err(ContestError::AlreadyActive {
                    name: slot.name.clone(),
                });
            }

            state.contest.begin();
            state.run = state.run.wrapping_add(1);
            let handle = runtime.spawn(tick_loop(
                Arc::clone(&slot),
                self.tick_context(),
                state.run,
                self.settings.tick_interval,
            ));
            if let Some(stale) = state.ticker.replace(handle) {
                stale.abort();
            }
            info!(
                contest = %slot.name,
                run = state.run,
                capture_seconds = state.contest.capture_duration_seconds(),
                "Contest started"
            );
        }

        deliver_all(
            self.sink.as_ref(),
            &[ContestEvent::Started {
                contest: slot.name.clone(),
            }],
        );
        Ok(())
    }

    /// Stop a running contest without granting a reward.
    ///
    /// Ending an inactive contest does nothing, so repeated calls emit a
    /// single `ended` event. No tick runs after this returns, except one
    /// already in flight, which notices the contest has ended and exits.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::NotFound`] for an unknown name.
    pub fn end(&self, name: &str) -> Result<(), ContestError> {
        let slot = self.slot(name)?;

        {
            let mut state = slot.lock();
            if !state.contest.is_active() {
                debug!(contest = %slot.name, "End ignored: contest not active");
                return Ok(());
            }
            if let Some(ticker) = state.ticker.take() {
                ticker.abort();
            }
            let discarded = state.contest.finish();
            info!(contest = %slot.name, discarded_holder = ?discarded, "Contest stopped");
        }

        deliver_all(
            self.sink.as_ref(),
            &[ContestEvent::Ended {
                contest: slot.name.clone(),
                winner: None,
            }],
        );
        Ok(())
    }

    /// Drop `actor` as holder of every contest it holds, resetting progress
    /// immediately instead of waiting for the next tick.
    ///
    /// Returns the number of contests the actor was holding.
    pub fn actor_departed(&self, actor: ActorId) -> usize {
        let mut released: usize = 0;
        for slot in self.slots() {
            if !slot.lock().contest.release(actor) {
                continue;
            }
            released = released.saturating_add(1);
            info!(contest = %slot.name, %actor, "Holder departed");
            deliver_all(
                self.sink.as_ref(),
                &[ContestEvent::CaptureInterrupted {
                    contest: slot.name.clone(),
                    previous: actor,
                }],
            );
        }
        released
    }

    /// Re-evaluate the holder of every active contest whose zone `actor`
    /// entered or left between `from` and `to`.
    ///
    /// Call this after the oracle reflects the new position. The countdown is
    /// not advanced; only the single-holder rule is applied.
    pub fn actor_moved(&self, actor: ActorId, from: &Position, to: &Position) {
        for slot in self.slots() {
            let was_inside = self.oracle.contains(&slot.zone, from);
            let is_inside = self.oracle.contains(&slot.zone, to);
            if was_inside == is_inside || !slot.lock().contest.is_active() {
                continue;
            }

            let inside = match oracle::occupants(self.oracle.as_ref(), &slot.zone) {
                Ok(inside) => inside,
                Err(e) => {
                    warn!(contest = %slot.name, %actor, error = %e, "Occupancy query failed on movement");
                    continue;
                }
            };

            let change = slot.lock().contest.observe(&inside);
            if let Some(change) = change {
                debug!(contest = %slot.name, %actor, entered = is_inside, "Holder changed on movement");
                deliver_all(self.sink.as_ref(), &holder_change_events(&slot.name, change));
            }
        }
    }

    /// Stop every tick loop without rewards and persist every contest.
    ///
    /// Captures in progress are discarded. Every contest is written even if
    /// an earlier write fails; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ContestError::Store`] if any record could not be written.
    pub fn shutdown(&self) -> Result<usize, ContestError> {
        let mut saved: usize = 0;
        let mut first_error: Option<StoreError> = None;

        for slot in self.slots() {
            let record = {
                let mut state = slot.lock();
                if let Some(ticker) = state.ticker.take() {
                    ticker.abort();
                }
                if state.contest.is_active() {
                    let discarded = state.contest.finish();
                    info!(contest = %slot.name, discarded_holder = ?discarded, "Capture discarded by shutdown");
                }
                state.contest.to_record()
            };

            match self.store.save_contest(&record) {
                Ok(()) => saved = saved.saturating_add(1),
                Err(e) => {
                    error!(contest = %slot.name, error = %e, "Failed to persist contest on shutdown");
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(saved, "Capture engine shut down");
        first_error.map_or(Ok(saved), |source| Err(ContestError::Store { source }))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn tick_context(&self) -> TickContext {
        TickContext {
            oracle: Arc::clone(&self.oracle),
            sink: Arc::clone(&self.sink),
            message_interval: self.settings.message_interval_seconds,
        }
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<Slot>>> {
        self.contests.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn find(&self, name: &str) -> Option<Arc<Slot>> {
        self.contests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name_key(name))
            .cloned()
    }

    fn slot(&self, name: &str) -> Result<Arc<Slot>, ContestError> {
        self.find(name).ok_or_else(|| ContestError::NotFound {
            name: name.to_owned(),
        })
    }

    fn slots(&self) -> Vec<Arc<Slot>> {
        self.contests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// Tick one contest every `period` until its run ends.
async fn tick_loop(slot: Arc<Slot>, ctx: TickContext, run: u64, period: Duration) {
    let first = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if matches!(run_tick(&slot, &ctx, run), TickFlow::Stop) {
            break;
        }
    }
    debug!(contest = %slot.name, run, "Tick loop finished");
}

/// One capture tick. Oracle and sink are only touched without the lock.
fn run_tick(slot: &Slot, ctx: &TickContext, run: u64) -> TickFlow {
    let inside = match oracle::occupants(ctx.oracle.as_ref(), &slot.zone) {
        Ok(inside) => inside,
        Err(e) => {
            warn!(contest = %slot.name, error = %e, "Occupancy query failed; skipping tick");
            return TickFlow::Continue;
        }
    };

    let mut events = Vec::new();
    let flow = {
        let mut state = slot.lock();
        if state.run != run || !state.contest.is_active() {
            return TickFlow::Stop;
        }

        if let Some(change) = state.contest.observe(&inside) {
            events.extend(holder_change_events(&slot.name, change));
        }

        match state.contest.advance(ctx.message_interval) {
            Advance::Idle => TickFlow::Continue,
            Advance::Progress {
                holder,
                remaining_seconds,
                fraction,
                broadcast,
            } => {
                if broadcast {
                    events.push(ContestEvent::Progress {
                        contest: slot.name.clone(),
                        holder,
                        remaining_seconds,
                    });
                }
                events.push(ContestEvent::HolderProgress {
                    contest: slot.name.clone(),
                    actor: holder,
                    fraction,
                    remaining_seconds,
                });
                TickFlow::Continue
            }
            Advance::Captured { holder } => {
                let winner = Winner {
                    actor: holder,
                    reward_location: state.contest.reward_location().clone(),
                };
                state.contest.finish();
                // This is the running task; dropping the handle detaches it.
                state.ticker = None;
                info!(contest = %slot.name, winner = %holder, "Contest captured");
                events.push(ContestEvent::Ended {
                    contest: slot.name.clone(),
                    winner: Some(winner),
                });
                TickFlow::Stop
            }
        }
    };

    deliver_all(ctx.sink.as_ref(), &events);
    flow
}

fn holder_change_events(contest: &str, change: HolderChange) -> Vec<ContestEvent> {
    match change {
        HolderChange::Acquired { actor, previous } => {
            let mut events = Vec::with_capacity(2);
            if let Some(previous) = previous {
                events.push(ContestEvent::CaptureInterrupted {
                    contest: contest.to_owned(),
                    previous,
                });
            }
            events.push(ContestEvent::CaptureStarted {
                contest: contest.to_owned(),
                actor,
            });
            events
        }
        HolderChange::Interrupted { previous } => vec![ContestEvent::CaptureInterrupted {
            contest: contest.to_owned(),
            previous,
        }],
    }
}

/// Deliver events one by one; a panicking sink is logged, not propagated.
fn deliver_all(sink: &dyn EventSink, events: &[ContestEvent]) {
    for event in events {
        let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| event.deliver(sink)));
        if delivered.is_err() {
            error!(contest = event.contest(), ?event, "Event sink panicked");
        }
    }
}
