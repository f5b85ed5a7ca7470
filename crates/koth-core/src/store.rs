//! Persistence interfaces for contests, the schedule and reward commands.
//!
//! Only durable fields cross this boundary: a [`ContestRecord`] never carries
//! the active flag, holder or countdown, so every contest comes back
//! inactive after a restart. The file-backed implementation lives in the
//! `koth-store` crate; [`MemoryStore`] keeps everything in process and is
//! what the tests inject.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use koth_types::{ContestRecord, ScheduleRecord};

/// Errors a store can report.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// The stored document could not be encoded or decoded.
    #[error("store serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },
}

/// Durable storage for contest definitions.
pub trait ContestStore: Send + Sync {
    /// Insert or replace the record with the same (case-insensitive) name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    fn save_contest(&self, record: &ContestRecord) -> Result<(), StoreError>;

    /// All well-formed records. Implementations skip malformed entries with a
    /// warning instead of failing the whole load.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store as a whole cannot be read.
    fn load_all_contests(&self) -> Result<Vec<ContestRecord>, StoreError>;

    /// Remove the record with this (case-insensitive) name, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the change cannot be written.
    fn delete_contest(&self, name: &str) -> Result<(), StoreError>;
}

/// Durable storage for the schedule configuration.
pub trait ScheduleStore: Send + Sync {
    /// The stored schedule, or `None` if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn load_schedule(&self) -> Result<Option<ScheduleRecord>, StoreError>;

    /// Replace the stored schedule.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    fn save_schedule(&self, record: &ScheduleRecord) -> Result<(), StoreError>;
}

/// Durable storage for the reward command templates.
pub trait RewardStore: Send + Sync {
    /// The stored templates in order, or `None` if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read.
    fn load_reward_commands(&self) -> Result<Option<Vec<String>>, StoreError>;

    /// Replace the stored templates.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the list cannot be written.
    fn save_reward_commands(&self, commands: &[String]) -> Result<(), StoreError>;
}

/// Lookup key for a contest name.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Debug, Default)]
struct MemoryState {
    contests: BTreeMap<String, ContestRecord>,
    schedule: Option<ScheduleRecord>,
    rewards: Option<Vec<String>>,
}

/// Store that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored contest records.
    pub fn contest_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contests
            .len()
    }
}

impl ContestStore for MemoryStore {
    fn save_contest(&self, record: &ContestRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.contests.insert(name_key(&record.name), record.clone());
        Ok(())
    }

    fn load_all_contests(&self) -> Result<Vec<ContestRecord>, StoreError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.contests.values().cloned().collect())
    }

    fn delete_contest(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.contests.remove(&name_key(name));
        Ok(())
    }
}

impl ScheduleStore for MemoryStore {
    fn load_schedule(&self) -> Result<Option<ScheduleRecord>, StoreError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.schedule.clone())
    }

    fn save_schedule(&self, record: &ScheduleRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.schedule = Some(record.clone());
        Ok(())
    }
}

impl RewardStore for MemoryStore {
    fn load_reward_commands(&self) -> Result<Option<Vec<String>>, StoreError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.rewards.clone())
    }

    fn save_reward_commands(&self, commands: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.rewards = Some(commands.to_vec());
        Ok(())
    }
}
