//! Single-file YAML store.
//!
//! Layout of the data file:
//!
//! ```yaml
//! contests:
//!   hill1:
//!     name: Hill1
//!     zone: { region: hill1, world: world }
//!     reward-location: { world: world, x: 0.5, y: 64.0, z: 0.5, yaw: 0.0, pitch: 0.0 }
//!     capture-duration-seconds: 300
//! schedules:
//!   enabled: true
//!   timezone: America/Argentina/Buenos_Aires
//!   times: ["14:30", "20:00"]
//! rewards:
//!   - "/broadcast {koth} was captured"
//!   - "give {player} diamond 5"
//! ```
//!
//! Contest entries are keyed by lowercase name and decoded one at a time,
//! so a single malformed entry is skipped with a warning and left untouched
//! on disk. Every change rewrites the whole file through a temporary file
//! and a rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use koth_core::store::{ContestStore, RewardStore, ScheduleStore, StoreError, name_key};
use koth_types::{ContestRecord, ScheduleRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// On-disk document. Entries stay as raw YAML until they are read.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DataFile {
    #[serde(default)]
    contests: BTreeMap<String, serde_yml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schedules: Option<serde_yml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rewards: Option<serde_yml::Value>,
}

fn serialization(e: &serde_yml::Error) -> StoreError {
    StoreError::Serialization {
        message: e.to_string(),
    }
}

/// Contest, schedule and reward store backed by one YAML file.
#[derive(Debug)]
pub struct YamlStore {
    path: PathBuf,
    data: Mutex<DataFile>,
}

impl YamlStore {
    /// Open the data file, treating a missing or blank file as empty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read, or
    /// [`StoreError::Serialization`] if it is not a YAML mapping.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => DataFile::default(),
            Ok(contents) => serde_yml::from_str(&contents).map_err(|e| serialization(&e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No data file yet; starting empty");
                DataFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        debug!(
            path = %path.display(),
            contests = data.contests.len(),
            "Data file opened"
        );
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, DataFile> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `data` to a sibling temporary file and move it into place.
    fn flush(&self, data: &DataFile) -> Result<(), StoreError> {
        let yaml = serde_yml::to_string(data).map_err(|e| serialization(&e))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, yaml)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "Data file written");
        Ok(())
    }

    /// Apply `change` to the document and persist it; on failure the
    /// in-memory document is rolled back.
    fn update(&self, change: impl FnOnce(&mut DataFile)) -> Result<(), StoreError> {
        let mut data = self.lock();
        let previous_contests = data.contests.clone();
        let previous_schedules = data.schedules.clone();
        let previous_rewards = data.rewards.clone();
        change(&mut data);
        if let Err(e) = self.flush(&data) {
            data.contests = previous_contests;
            data.schedules = previous_schedules;
            data.rewards = previous_rewards;
            return Err(e);
        }
        Ok(())
    }
}

impl ContestStore for YamlStore {
    fn save_contest(&self, record: &ContestRecord) -> Result<(), StoreError> {
        let value = serde_yml::to_value(record).map_err(|e| serialization(&e))?;
        self.update(|data| {
            data.contests.insert(name_key(&record.name), value);
        })
    }

    fn load_all_contests(&self) -> Result<Vec<ContestRecord>, StoreError> {
        let data = self.lock();
        let mut records = Vec::with_capacity(data.contests.len());
        for (key, value) in &data.contests {
            match serde_yml::from_value::<ContestRecord>(value.clone()) {
                Ok(record) => records.push(record),
                Err(e) => warn!(contest = %key, error = %e, "Skipping malformed contest entry"),
            }
        }
        Ok(records)
    }

    fn delete_contest(&self, name: &str) -> Result<(), StoreError> {
        let key = name_key(name);
        if !self.lock().contests.contains_key(&key) {
            return Ok(());
        }
        self.update(|data| {
            data.contests.remove(&key);
        })
    }
}

impl ScheduleStore for YamlStore {
    fn load_schedule(&self) -> Result<Option<ScheduleRecord>, StoreError> {
        let data = self.lock();
        let Some(value) = data.schedules.clone() else {
            return Ok(None);
        };
        match serde_yml::from_value::<ScheduleRecord>(value) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed schedules section");
                Ok(None)
            }
        }
    }

    fn save_schedule(&self, record: &ScheduleRecord) -> Result<(), StoreError> {
        let value = serde_yml::to_value(record).map_err(|e| serialization(&e))?;
        self.update(|data| {
            data.schedules = Some(value);
        })
    }
}

impl RewardStore for YamlStore {
    fn load_reward_commands(&self) -> Result<Option<Vec<String>>, StoreError> {
        let data = self.lock();
        let Some(value) = data.rewards.clone() else {
            return Ok(None);
        };
        match serde_yml::from_value::<Vec<String>>(value) {
            Ok(commands) => Ok(Some(commands)),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed rewards section");
                Ok(None)
            }
        }
    }

    fn save_reward_commands(&self, commands: &[String]) -> Result<(), StoreError> {
        let value = serde_yml::to_value(commands).map_err(|e| serialization(&e))?;
        self.update(|data| {
            data.rewards = Some(value);
        })
    }
}
