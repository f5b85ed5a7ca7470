//! Daily auto-start schedule.
//!
//! The schedule is a set of `HH:MM` wall-clock times in one IANA time zone.
//! A driver task checks once per minute, aligned to the minute boundary;
//! when the local time matches, one random inactive contest is started
//! through [`CaptureEngine::start`], the same path a manual start takes.
//!
//! Each (local date, time) pair fires at most once per day: every time that
//! has fired today is remembered until the local date changes, so a check
//! that runs twice within the same minute, or a clock that steps back, never
//! starts a second contest for the same slot.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use koth_types::ScheduleRecord;
use rand::seq::IndexedRandom;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ScheduleConfig;
use crate::engine::CaptureEngine;
use crate::store::{ScheduleStore, StoreError};

/// Period between two checks. One check per minute is what lets every
/// `HH:MM` slot be seen.
const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Errors returned by schedule operations.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// The value is not a strict 24-hour `HH:MM` time.
    #[error("invalid time {value}: expected HH:MM")]
    InvalidFormat {
        /// The rejected input.
        value: String,
    },

    /// The time is already scheduled.
    #[error("time {time} is already scheduled")]
    DuplicateTime {
        /// The duplicated time.
        time: ScheduleTime,
    },

    /// The time is not scheduled.
    #[error("time {time} is not scheduled")]
    NotFound {
        /// The requested time.
        time: ScheduleTime,
    },

    /// The name is not a known IANA time zone.
    #[error("unknown time zone {name}")]
    InvalidTimezone {
        /// The rejected name.
        name: String,
    },

    /// The persistence collaborator failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },
}

/// A wall-clock minute of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScheduleTime {
    hour: u8,
    minute: u8,
}

impl ScheduleTime {
    /// Build a time, or `None` if out of range.
    pub const fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    /// Hour of the day, `0..24`.
    pub const fn hour(self) -> u8 {
        self.hour
    }

    /// Minute of the hour, `0..60`.
    pub const fn minute(self) -> u8 {
        self.minute
    }

    /// The minute a local timestamp falls in.
    pub fn of<T: Timelike>(time: &T) -> Option<Self> {
        let hour = u8::try_from(time.hour()).ok()?;
        let minute = u8::try_from(time.minute()).ok()?;
        Self::new(hour, minute)
    }
}

impl FromStr for ScheduleTime {
    type Err = ScheduleError;

    /// Parse exactly two hour digits, a colon, and two minute digits.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleError::InvalidFormat {
            value: value.to_owned(),
        };
        let (hour, minute) = value.split_once(':').ok_or_else(invalid)?;
        let two_digits = |part: &str| part.len() == 2 && part.bytes().all(|b| b.is_ascii_digit());
        if !two_digits(hour) || !two_digits(minute) {
            return Err(invalid());
        }
        let hour: u8 = hour.parse().map_err(|_err| invalid())?;
        let minute: u8 = minute.parse().map_err(|_err| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl core::fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone)]
struct ScheduleState {
    enabled: bool,
    timezone: Tz,
    times: BTreeSet<ScheduleTime>,
}

impl ScheduleState {
    /// Build state from a stored or configured record, skipping bad entries.
    fn from_record(record: &ScheduleRecord) -> Self {
        let timezone = record.timezone.parse::<Tz>().unwrap_or_else(|_err| {
            warn!(timezone = %record.timezone, "Unknown schedule time zone; using UTC");
            Tz::UTC
        });
        let times = record
            .times
            .iter()
            .filter_map(|raw| match raw.parse::<ScheduleTime>() {
                Ok(time) => Some(time),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid schedule time");
                    None
                }
            })
            .collect();
        Self {
            enabled: record.enabled,
            timezone,
            times,
        }
    }

    fn to_record(&self) -> ScheduleRecord {
        ScheduleRecord {
            enabled: self.enabled,
            timezone: self.timezone.name().to_owned(),
            times: self.times.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Times already fired on one local date.
#[derive(Debug, Default)]
struct FiredSlots {
    date: Option<NaiveDate>,
    times: BTreeSet<ScheduleTime>,
}

impl FiredSlots {
    /// Record `time` on `date`. Returns `false` if it already fired that day.
    fn claim(&mut self, date: NaiveDate, time: ScheduleTime) -> bool {
        if self.date != Some(date) {
            self.date = Some(date);
            self.times.clear();
        }
        self.times.insert(time)
    }
}

/// Starts contests at configured times of day.
pub struct ScheduleEngine {
    capture: Arc<CaptureEngine>,
    store: Arc<dyn ScheduleStore>,
    defaults: ScheduleRecord,
    state: RwLock<ScheduleState>,
    fired: Mutex<FiredSlots>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl core::fmt::Debug for ScheduleEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScheduleEngine")
            .field("state", &*self.read_state())
            .finish_non_exhaustive()
    }
}

impl ScheduleEngine {
    /// Create a stopped schedule holding the configured defaults.
    ///
    /// Call [`reload`](Self::reload) to pick up the stored schedule and start
    /// the driver.
    pub fn new(
        capture: Arc<CaptureEngine>,
        store: Arc<dyn ScheduleStore>,
        defaults: &ScheduleConfig,
    ) -> Self {
        let defaults = ScheduleRecord {
            enabled: defaults.enabled,
            timezone: defaults.timezone.clone(),
            times: defaults.times.clone(),
        };
        Self {
            capture,
            store,
            state: RwLock::new(ScheduleState::from_record(&defaults)),
            defaults,
            fired: Mutex::new(FiredSlots::default()),
            driver: Mutex::new(None),
        }
    }

    /// Scheduled times in ascending order.
    pub fn times(&self) -> Vec<ScheduleTime> {
        self.read_state().times.iter().copied().collect()
    }

    /// Whether scheduled starts are enabled.
    pub fn is_enabled(&self) -> bool {
        self.read_state().enabled
    }

    /// IANA name of the schedule's time zone.
    pub fn timezone(&self) -> String {
        self.read_state().timezone.name().to_owned()
    }

    /// Whether the driver task is running.
    pub fn is_running(&self) -> bool {
        self.lock_driver()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Add a daily time and persist the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidFormat`],
    /// [`ScheduleError::DuplicateTime`], or [`ScheduleError::Store`] (the
    /// time is not added).
    pub fn add_time(&self, value: &str) -> Result<ScheduleTime, ScheduleError> {
        let time: ScheduleTime = value.parse()?;
        let mut state = self.write_state();
        if state.times.contains(&time) {
            return Err(ScheduleError::DuplicateTime { time });
        }

        let mut updated = state.clone();
        updated.times.insert(time);
        self.store.save_schedule(&updated.to_record())?;
        *state = updated;

        info!(%time, "Schedule time added");
        Ok(time)
    }

    /// Remove a daily time and persist the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidFormat`], [`ScheduleError::NotFound`],
    /// or [`ScheduleError::Store`] (the time is kept).
    pub fn remove_time(&self, value: &str) -> Result<(), ScheduleError> {
        let time: ScheduleTime = value.parse()?;
        let mut state = self.write_state();
        if !state.times.contains(&time) {
            return Err(ScheduleError::NotFound { time });
        }

        let mut updated = state.clone();
        updated.times.remove(&time);
        self.store.save_schedule(&updated.to_record())?;
        *state = updated;

        info!(%time, "Schedule time removed");
        Ok(())
    }

    /// Change the time zone and persist the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::InvalidTimezone`] or [`ScheduleError::Store`].
    pub fn set_timezone(&self, name: &str) -> Result<(), ScheduleError> {
        let timezone = name.parse::<Tz>().map_err(|_err| ScheduleError::InvalidTimezone {
            name: name.to_owned(),
        })?;
        let mut state = self.write_state();
        let mut updated = state.clone();
        updated.timezone = timezone;
        self.store.save_schedule(&updated.to_record())?;
        *state = updated;

        info!(timezone = name, "Schedule time zone changed");
        Ok(())
    }

    /// Enable or disable scheduled starts, persist, and start or stop the
    /// driver to match. Times and time zone are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Store`] if the change cannot be persisted.
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) -> Result<(), ScheduleError> {
        {
            let mut state = self.write_state();
            let mut updated = state.clone();
            updated.enabled = enabled;
            self.store.save_schedule(&updated.to_record())?;
            *state = updated;
        }
        info!(enabled, "Schedule toggled");

        self.stop();
        if enabled {
            self.spawn_driver();
        }
        Ok(())
    }

    /// Stop the driver, re-read the stored schedule (or the configured
    /// defaults when nothing is stored), and restart the driver if enabled.
    ///
    /// Contest state is never touched.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::Store`] if the stored schedule cannot be read;
    /// the driver stays stopped.
    pub fn reload(self: &Arc<Self>) -> Result<(), ScheduleError> {
        self.stop();
        let record = self
            .store
            .load_schedule()?
            .unwrap_or_else(|| self.defaults.clone());
        let state = ScheduleState::from_record(&record);
        let enabled = state.enabled;
        info!(
            enabled,
            timezone = state.timezone.name(),
            times = state.times.len(),
            "Schedule loaded"
        );
        *self.write_state() = state;

        if enabled {
            self.spawn_driver();
        }
        Ok(())
    }

    /// Stop the driver task, if running.
    pub fn stop(&self) {
        if let Some(handle) = self.lock_driver().take() {
            handle.abort();
            debug!("Schedule driver stopped");
        }
    }

    /// Run the minute check as if the clock read `now`.
    ///
    /// Returns the name of the contest that was started, if any.
    pub fn check_at(&self, now: DateTime<Utc>) -> Option<String> {
        let (date, time) = {
            let state = self.read_state();
            if !state.enabled {
                return None;
            }
            let local = now.with_timezone(&state.timezone);
            let time = ScheduleTime::of(&local)?;
            if !state.times.contains(&time) {
                return None;
            }
            (local.date_naive(), time)
        };

        if !self
            .fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .claim(date, time)
        {
            debug!(%date, %time, "Schedule slot already fired");
            return None;
        }

        let inactive = self.capture.inactive_names();
        let Some(name) = inactive.choose(&mut rand::rng()) else {
            info!(%time, "Scheduled time reached but no inactive contest");
            return None;
        };

        match self.capture.start(name) {
            Ok(()) => {
                info!(%time, contest = %name, "Scheduled contest started");
                Some(name.clone())
            }
            Err(e) => {
                warn!(%time, contest = %name, error = %e, "Scheduled start failed");
                None
            }
        }
    }

    fn spawn_driver(self: &Arc<Self>) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No Tokio runtime; schedule driver not started");
            return;
        };
        let weak = Arc::downgrade(self);
        let period = CHECK_INTERVAL;
        let handle = runtime.spawn(drive(weak, period));
        if let Some(stale) = self.lock_driver().replace(handle) {
            stale.abort();
        }
        debug!(period_secs = period.as_secs(), "Schedule driver started");
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ScheduleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ScheduleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_driver(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Time until the next wall-clock minute boundary.
fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let into_minute = Duration::from_secs(u64::from(now.second()))
        .saturating_add(Duration::from_nanos(u64::from(now.nanosecond())));
    Duration::from_secs(60).saturating_sub(into_minute)
}

/// Driver loop. Exits once the schedule engine is dropped.
async fn drive(schedule: Weak<ScheduleEngine>, period: Duration) {
    tokio::time::sleep(until_next_minute(Utc::now())).await;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(schedule) = schedule.upgrade() else {
            break;
        };
        schedule.check_at(Utc::now());
    }
}
