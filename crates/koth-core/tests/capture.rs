//! Capture engine scenarios driven on Tokio's paused clock.
//!
//! Every test starts contests at virtual `t = 0` with a one-second tick, so
//! tick `n` fires at `t = n`. Tests move actors at half-second offsets to
//! land cleanly between ticks.

#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::arithmetic_side_effects
)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use koth_core::engine::{CaptureEngine, ContestError, EngineSettings};
use koth_core::oracle::{Cuboid, InMemoryOracle, OccupancyOracle, OracleError};
use koth_core::reward::{RewardDispatcher, RewardRelay};
use koth_core::sink::{ChannelSink, ContestEvent, EventSink, Winner};
use koth_core::store::{ContestStore, MemoryStore};
use koth_types::{ActorId, Position, ZoneRef};
use tokio::sync::mpsc::UnboundedReceiver;

// =============================================================================
// Harness
// =============================================================================

const HILL: &str = "hill1";

fn hill_zone() -> ZoneRef {
    ZoneRef::new(HILL, "world")
}

fn inside() -> Position {
    Position::new("world", 5.0, 65.0, 5.0)
}

fn outside() -> Position {
    Position::new("world", 50.0, 65.0, 50.0)
}

fn reward_spot() -> Position {
    Position::new("world", 0.0, 64.0, 0.0)
}

fn settings() -> EngineSettings {
    EngineSettings {
        default_capture_seconds: 5,
        message_interval_seconds: 2,
        tick_interval: Duration::from_secs(1),
    }
}

#[derive(Default)]
struct CountingRewards {
    grants: Mutex<Vec<(String, ActorId)>>,
}

impl RewardDispatcher for CountingRewards {
    fn grant(&self, contest: &str, winner: &Winner) {
        self.grants
            .lock()
            .unwrap()
            .push((contest.to_owned(), winner.actor));
    }
}

struct Harness {
    engine: Arc<CaptureEngine>,
    oracle: Arc<InMemoryOracle>,
    store: Arc<MemoryStore>,
    rewards: Arc<CountingRewards>,
    events: UnboundedReceiver<ContestEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_oracle_and_store(Arc::new(InMemoryOracle::new()), Arc::new(MemoryStore::new()))
    }

    fn with_oracle_and_store(oracle: Arc<InMemoryOracle>, store: Arc<MemoryStore>) -> Self {
        oracle.define_zone(
            hill_zone(),
            Cuboid::from_corners([0.0, 60.0, 0.0], [10.0, 70.0, 10.0]),
        );
        let (sink, events) = ChannelSink::new();
        let rewards = Arc::new(CountingRewards::default());
        let relay = RewardRelay::new(
            Arc::new(sink),
            Arc::clone(&rewards) as Arc<dyn RewardDispatcher>,
        );
        let engine = Arc::new(CaptureEngine::new(
            settings(),
            Arc::clone(&oracle) as Arc<dyn OccupancyOracle>,
            Arc::new(relay),
            Arc::clone(&store) as Arc<dyn ContestStore>,
        ));
        Self {
            engine,
            oracle,
            store,
            rewards,
            events,
        }
    }

    fn with_hill() -> Self {
        let harness = Self::new();
        harness
            .engine
            .create(HILL, hill_zone(), reward_spot())
            .unwrap();
        harness
    }

    fn drain(&mut self) -> Vec<ContestEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn grants(&self) -> Vec<(String, ActorId)> {
        self.rewards.grants.lock().unwrap().clone()
    }
}

async fn sleep_secs(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

fn count(events: &[ContestEvent], pred: impl Fn(&ContestEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

// =============================================================================
// Capture outcomes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn lone_holder_wins_after_full_duration() {
    let mut h = Harness::with_hill();
    let a = ActorId::new();
    h.oracle.set_position(a, inside());

    h.engine.start(HILL).unwrap();
    sleep_secs(4.5).await;
    let contest = h.engine.get(HILL).unwrap();
    assert!(contest.is_active());
    assert_eq!(contest.holder(), Some(a));
    assert_eq!(contest.remaining_seconds(), 1);

    sleep_secs(1.0).await;
    let contest = h.engine.get(HILL).unwrap();
    assert!(!contest.is_active());
    assert_eq!(contest.remaining_seconds(), 0);
    assert_eq!(contest.holder(), None);

    let events = h.drain();
    assert_eq!(
        events.first(),
        Some(&ContestEvent::Started {
            contest: String::from(HILL)
        })
    );
    assert_eq!(
        events[1],
        ContestEvent::CaptureStarted {
            contest: String::from(HILL),
            actor: a
        }
    );
    let broadcasts: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            ContestEvent::Progress {
                remaining_seconds, ..
            } => Some(*remaining_seconds),
            _ => None,
        })
        .collect();
    assert_eq!(broadcasts, vec![4, 2]);
    assert_eq!(
        count(&events, |e| matches!(e, ContestEvent::HolderProgress { .. })),
        4
    );
    assert_eq!(count(&events, |e| matches!(e, ContestEvent::Ended { .. })), 1);
    assert!(matches!(
        events.last(),
        Some(ContestEvent::Ended { winner: Some(w), .. }) if w.actor == a && w.reward_location == reward_spot()
    ));
    assert_eq!(h.grants(), vec![(String::from(HILL), a)]);

    // The loop is gone: nothing more happens.
    sleep_secs(10.0).await;
    assert!(h.drain().is_empty());
    assert_eq!(h.grants().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn contested_zone_resets_and_fresh_holder_needs_full_duration() {
    let mut h = Harness::with_hill();
    let a = ActorId::new();
    let b = ActorId::new();
    let c = ActorId::new();
    h.oracle.set_position(a, inside());
    h.engine.start(HILL).unwrap();

    // A alone for ticks 1..=3.
    sleep_secs(3.5).await;
    assert_eq!(h.engine.get(HILL).unwrap().remaining_seconds(), 2);

    // B joins for tick 4.
    h.oracle.set_position(b, inside());
    sleep_secs(1.0).await;
    let contest = h.engine.get(HILL).unwrap();
    assert_eq!(contest.holder(), None);
    assert_eq!(contest.remaining_seconds(), 5);

    // Both leave; tick 5 sees an empty zone.
    h.oracle.set_position(a, outside());
    h.oracle.set_position(b, outside());
    sleep_secs(1.0).await;
    assert_eq!(h.engine.get(HILL).unwrap().remaining_seconds(), 5);

    // C alone from tick 6 needs five full ticks.
    h.oracle.set_position(c, inside());
    sleep_secs(4.0).await;
    let contest = h.engine.get(HILL).unwrap();
    assert!(contest.is_active());
    assert_eq!(contest.holder(), Some(c));
    assert_eq!(contest.remaining_seconds(), 1);

    sleep_secs(1.0).await;
    assert!(!h.engine.get(HILL).unwrap().is_active());

    let events = h.drain();
    assert_eq!(
        count(&events, |e| matches!(e, ContestEvent::CaptureInterrupted { previous, .. } if *previous == a)),
        1
    );
    assert!(matches!(
        events.last(),
        Some(ContestEvent::Ended { winner: Some(w), .. }) if w.actor == c
    ));
    assert_eq!(h.grants(), vec![(String::from(HILL), c)]);
}

#[tokio::test(start_paused = true)]
async fn holder_swap_between_ticks_restarts_countdown() {
    let mut h = Harness::with_hill();
    let a = ActorId::new();
    let b = ActorId::new();
    h.oracle.set_position(a, inside());
    h.engine.start(HILL).unwrap();
    sleep_secs(2.5).await;

    h.oracle.set_position(a, outside());
    h.oracle.set_position(b, inside());
    sleep_secs(1.0).await;

    let contest = h.engine.get(HILL).unwrap();
    assert_eq!(contest.holder(), Some(b));
    assert_eq!(contest.remaining_seconds(), 4);

    let events = h.drain();
    let swap: Vec<&ContestEvent> = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                ContestEvent::CaptureInterrupted { .. } | ContestEvent::CaptureStarted { .. }
            )
        })
        .collect();
    assert_eq!(swap.len(), 3);
    assert!(matches!(swap[1], ContestEvent::CaptureInterrupted { previous, .. } if *previous == a));
    assert!(matches!(swap[2], ContestEvent::CaptureStarted { actor, .. } if *actor == b));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn start_twice_is_already_active() {
    let mut h = Harness::with_hill();
    h.engine.start(HILL).unwrap();
    let err = h.engine.start("HILL1").unwrap_err();
    assert!(matches!(err, ContestError::AlreadyActive { .. }));
    assert_eq!(
        count(&h.drain(), |e| matches!(e, ContestEvent::Started { .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn end_twice_emits_one_ended_and_never_rewards() {
    let mut h = Harness::with_hill();
    let a = ActorId::new();
    h.oracle.set_position(a, inside());
    h.engine.start(HILL).unwrap();
    sleep_secs(3.5).await;

    h.engine.end(HILL).unwrap();
    h.engine.end(HILL).unwrap();

    let contest = h.engine.get(HILL).unwrap();
    assert!(!contest.is_active());
    assert_eq!(contest.remaining_seconds(), 0);
    assert_eq!(contest.holder(), None);

    sleep_secs(10.0).await;
    let events = h.drain();
    assert_eq!(
        count(&events, |e| matches!(e, ContestEvent::Ended { winner: None, .. })),
        1
    );
    assert_eq!(count(&events, |e| matches!(e, ContestEvent::Ended { .. })), 1);
    assert!(matches!(events.last(), Some(ContestEvent::Ended { winner: None, .. })));
    assert!(h.grants().is_empty());
}

#[tokio::test(start_paused = true)]
async fn restart_after_end_begins_from_full_duration() {
    let h = Harness::with_hill();
    let a = ActorId::new();
    h.oracle.set_position(a, inside());
    h.engine.start(HILL).unwrap();
    sleep_secs(2.5).await;
    h.engine.end(HILL).unwrap();

    h.engine.start(HILL).unwrap();
    let contest = h.engine.get(HILL).unwrap();
    assert_eq!(contest.remaining_seconds(), 5);
    assert_eq!(contest.holder(), None);

    sleep_secs(1.2).await;
    assert_eq!(h.engine.get(HILL).unwrap().remaining_seconds(), 4);
}

#[tokio::test(start_paused = true)]
async fn delete_active_contest_fails_and_leaves_it_running() {
    let h = Harness::with_hill();
    h.engine.start(HILL).unwrap();

    let err = h.engine.delete(HILL).unwrap_err();
    assert!(matches!(err, ContestError::ContestActive { .. }));
    assert!(h.engine.get(HILL).unwrap().is_active());
    assert_eq!(h.store.contest_count(), 1);

    h.engine.end(HILL).unwrap();
    h.engine.delete(HILL).unwrap();
    assert!(h.engine.get(HILL).is_none());
    assert!(matches!(h.engine.start(HILL), Err(ContestError::NotFound { .. })));
}

#[tokio::test(start_paused = true)]
async fn edits_rejected_while_active() {
    let h = Harness::with_hill();
    h.engine.start(HILL).unwrap();
    assert!(matches!(
        h.engine.set_reward_location(HILL, outside()),
        Err(ContestError::ContestActive { .. })
    ));
    assert!(matches!(
        h.engine.set_capture_duration(HILL, 30),
        Err(ContestError::ContestActive { .. })
    ));
    assert_eq!(h.engine.get(HILL).unwrap().reward_location(), &reward_spot());
}

// =============================================================================
// Presence changes between ticks
// =============================================================================

#[tokio::test(start_paused = true)]
async fn departure_resets_immediately() {
    let mut h = Harness::with_hill();
    let a = ActorId::new();
    h.oracle.set_position(a, inside());
    h.engine.start(HILL).unwrap();
    sleep_secs(2.5).await;
    h.drain();

    h.oracle.remove_actor(a);
    assert_eq!(h.engine.actor_departed(a), 1);

    let contest = h.engine.get(HILL).unwrap();
    assert_eq!(contest.holder(), None);
    assert_eq!(contest.remaining_seconds(), 5);
    assert_eq!(
        h.drain(),
        vec![ContestEvent::CaptureInterrupted {
            contest: String::from(HILL),
            previous: a
        }]
    );
    assert_eq!(h.engine.actor_departed(a), 0);
}

#[tokio::test(start_paused = true)]
async fn movement_out_of_zone_interrupts_without_waiting_for_tick() {
    let mut h = Harness::with_hill();
    let a = ActorId::new();
    h.oracle.set_position(a, inside());
    h.engine.start(HILL).unwrap();
    sleep_secs(1.5).await;
    h.drain();

    h.oracle.set_position(a, outside());
    h.engine.actor_moved(a, &inside(), &outside());
    assert_eq!(h.engine.get(HILL).unwrap().holder(), None);
    assert!(matches!(
        h.drain().as_slice(),
        [ContestEvent::CaptureInterrupted { previous, .. }] if *previous == a
    ));

    // Moving back in is picked up right away too.
    h.oracle.set_position(a, inside());
    h.engine.actor_moved(a, &outside(), &inside());
    assert_eq!(h.engine.get(HILL).unwrap().holder(), Some(a));

    // Movement inside the zone changes nothing.
    let before = h.engine.get(HILL).unwrap().remaining_seconds();
    h.engine.actor_moved(a, &inside(), &Position::new("world", 6.0, 65.0, 6.0));
    assert_eq!(h.engine.get(HILL).unwrap().remaining_seconds(), before);
}

// =============================================================================
// Collaborator failures
// =============================================================================

struct DownOracle;

impl OccupancyOracle for DownOracle {
    fn contains(&self, _zone: &ZoneRef, _position: &Position) -> bool {
        false
    }

    fn actors_in_world(&self, world: &str) -> Result<Vec<(ActorId, Position)>, OracleError> {
        Err(OracleError::WorldUnavailable {
            world: world.to_owned(),
        })
    }

    fn zone_exists(&self, _zone: &ZoneRef) -> bool {
        true
    }
}

#[tokio::test(start_paused = true)]
async fn oracle_failure_skips_ticks_without_stopping_the_loop() {
    let (sink, mut events) = ChannelSink::new();
    let engine = CaptureEngine::new(
        settings(),
        Arc::new(DownOracle),
        Arc::new(sink),
        Arc::new(MemoryStore::new()),
    );
    engine.create(HILL, hill_zone(), reward_spot()).unwrap();
    engine.start(HILL).unwrap();

    sleep_secs(5.5).await;
    let contest = engine.get(HILL).unwrap();
    assert!(contest.is_active());
    assert_eq!(contest.remaining_seconds(), 5);

    engine.end(HILL).unwrap();
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert_eq!(received.len(), 2);
}

struct PanickingSink;

impl EventSink for PanickingSink {
    fn on_started(&self, _contest: &str) {}

    fn on_capture_started(&self, _contest: &str, _actor: ActorId) {
        panic!("sink failure");
    }

    fn on_capture_interrupted(&self, _contest: &str, _previous: ActorId) {}

    fn on_progress(&self, _contest: &str, _holder: ActorId, _remaining_seconds: u32) {}

    fn on_holder_progress(&self, _contest: &str, _actor: ActorId, _fraction: f64, _remaining_seconds: u32) {}

    fn on_ended(&self, _contest: &str, _winner: Option<&Winner>) {}
}

#[tokio::test(start_paused = true)]
async fn panicking_sink_does_not_stall_the_capture() {
    let oracle = Arc::new(InMemoryOracle::new());
    oracle.define_zone(
        hill_zone(),
        Cuboid::from_corners([0.0, 60.0, 0.0], [10.0, 70.0, 10.0]),
    );
    let engine = CaptureEngine::new(
        settings(),
        Arc::clone(&oracle) as Arc<dyn OccupancyOracle>,
        Arc::new(PanickingSink),
        Arc::new(MemoryStore::new()),
    );
    engine.create(HILL, hill_zone(), reward_spot()).unwrap();
    oracle.set_position(ActorId::new(), inside());
    engine.start(HILL).unwrap();

    sleep_secs(5.5).await;
    assert!(!engine.get(HILL).unwrap().is_active());
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test(start_paused = true)]
async fn create_persist_reload_keeps_durable_fields_inactive() {
    let oracle = Arc::new(InMemoryOracle::new());
    let store = Arc::new(MemoryStore::new());
    let first = Harness::with_oracle_and_store(Arc::clone(&oracle), Arc::clone(&store));
    let spot = Position {
        yaw: 90.0,
        pitch: -10.0,
        ..Position::new("world", 3.5, 64.0, -2.25)
    };
    first.engine.create("Summit", hill_zone(), spot.clone()).unwrap();
    first.engine.set_capture_duration("summit", 42).unwrap();
    first.engine.start("summit").unwrap();
    first.engine.shutdown().unwrap();
    let before = first.engine.get("summit").unwrap();

    let second = Harness::with_oracle_and_store(oracle, store);
    assert_eq!(second.engine.load().unwrap(), 1);
    let after = second.engine.get("SUMMIT").unwrap();

    assert_eq!(after.to_record(), before.to_record());
    assert_eq!(after.name(), "Summit");
    assert_eq!(after.reward_location(), &spot);
    assert_eq!(after.capture_duration_seconds(), 42);
    assert!(!after.is_active());
    assert_eq!(after.holder(), None);
    assert_eq!(after.remaining_seconds(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_discards_capture_without_reward() {
    let mut h = Harness::with_hill();
    let a = ActorId::new();
    h.oracle.set_position(a, inside());
    h.engine.start(HILL).unwrap();
    sleep_secs(4.5).await;

    assert_eq!(h.engine.shutdown().unwrap(), 1);
    assert_eq!(h.engine.active_count(), 0);

    sleep_secs(5.0).await;
    let events = h.drain();
    assert_eq!(count(&events, |e| matches!(e, ContestEvent::Ended { .. })), 0);
    assert!(h.grants().is_empty());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_yield_exactly_one_started() {
    let mut h = Harness::with_hill();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&h.engine);
        handles.push(tokio::spawn(async move { engine.start(HILL).is_ok() }));
    }
    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(
        count(&h.drain(), |e| matches!(e, ContestEvent::Started { .. })),
        1
    );
    h.engine.end(HILL).unwrap();
}

/// Sink that stalls in `on_started` and counts the calls.
#[derive(Default)]
struct SlowStartSink {
    started: AtomicUsize,
    ended: AtomicUsize,
}

impl EventSink for SlowStartSink {
    fn on_started(&self, _contest: &str) {
        std::thread::sleep(Duration::from_millis(50));
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_capture_started(&self, _contest: &str, _actor: ActorId) {}

    fn on_capture_interrupted(&self, _contest: &str, _previous: ActorId) {}

    fn on_progress(&self, _contest: &str, _holder: ActorId, _remaining_seconds: u32) {}

    fn on_holder_progress(&self, _contest: &str, _actor: ActorId, _fraction: f64, _remaining_seconds: u32) {}

    fn on_ended(&self, _contest: &str, _winner: Option<&Winner>) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_with_slow_sink_yield_exactly_one_started() {
    const RACERS: usize = 16;

    let oracle = Arc::new(InMemoryOracle::new());
    oracle.define_zone(
        hill_zone(),
        Cuboid::from_corners([0.0, 60.0, 0.0], [10.0, 70.0, 10.0]),
    );
    let sink = Arc::new(SlowStartSink::default());
    let engine = Arc::new(CaptureEngine::new(
        settings(),
        Arc::clone(&oracle) as Arc<dyn OccupancyOracle>,
        Arc::clone(&sink) as Arc<dyn EventSink>,
        Arc::new(MemoryStore::new()),
    ));
    engine.create(HILL, hill_zone(), reward_spot()).unwrap();

    // Blocking threads keep the runtime context, and the barrier releases
    // every racer at once.
    let barrier = Arc::new(Barrier::new(RACERS));
    let mut handles = Vec::new();
    for _ in 0..RACERS {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::task::spawn_blocking(move || {
            barrier.wait();
            engine.start(HILL)
        }));
    }
    let mut wins = 0;
    let mut already_active = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => wins += 1,
            Err(ContestError::AlreadyActive { .. }) => already_active += 1,
            Err(e) => panic!("unexpected start error: {e}"),
        }
    }

    assert_eq!(wins, 1);
    assert_eq!(already_active, RACERS - 1);
    assert_eq!(sink.started.load(Ordering::SeqCst), 1);
    assert_eq!(engine.active_count(), 1);

    engine.end(HILL).unwrap();
    assert_eq!(sink.ended.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ends_yield_exactly_one_ended() {
    let mut h = Harness::with_hill();
    h.engine.start(HILL).unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = Arc::clone(&h.engine);
        handles.push(tokio::spawn(async move { engine.end(HILL).is_ok() }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    assert_eq!(
        count(&h.drain(), |e| matches!(e, ContestEvent::Ended { .. })),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn independent_contests_tick_independently() {
    let h = Harness::new();
    let second_zone = ZoneRef::new("hill2", "world");
    h.oracle.define_zone(
        second_zone.clone(),
        Cuboid::from_corners([100.0, 60.0, 100.0], [110.0, 70.0, 110.0]),
    );
    h.engine.create(HILL, hill_zone(), reward_spot()).unwrap();
    h.engine.create("hill2", second_zone, reward_spot()).unwrap();

    let a = ActorId::new();
    let b = ActorId::new();
    h.oracle.set_position(a, inside());
    h.oracle.set_position(b, Position::new("world", 105.0, 65.0, 105.0));
    h.engine.start(HILL).unwrap();
    sleep_secs(2.5).await;
    h.engine.start("hill2").unwrap();
    sleep_secs(3.0).await;

    assert!(!h.engine.get(HILL).unwrap().is_active());
    let second = h.engine.get("hill2").unwrap();
    assert!(second.is_active());
    assert_eq!(second.holder(), Some(b));
    assert_eq!(h.grants(), vec![(String::from(HILL), a)]);
    assert_eq!(h.engine.inactive_names(), vec![String::from(HILL)]);
}
