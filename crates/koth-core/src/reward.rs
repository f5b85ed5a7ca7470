//! Reward dispatch for contest winners.
//!
//! The capture engine only reports a winner through [`EventSink::on_ended`].
//! [`RewardRelay`] sits in front of the real sink and turns that report into
//! a [`RewardDispatcher::grant`] call, so the reward path is reachable from
//! the zero-countdown outcome and nothing else. [`CommandRewards`] is the
//! dispatcher used by the daemon: it renders the [`RewardTable`] templates
//! and hands each command to a [`CommandRunner`].
//!
//! A table built with [`RewardTable::with_store`] writes every edit through
//! its [`RewardStore`] before applying it, so runtime edits survive a
//! restart and a failed write leaves the table unchanged.

use std::sync::{Arc, PoisonError, RwLock};

use koth_types::ActorId;
use tracing::{debug, info, warn};

use crate::sink::{EventSink, Winner};
use crate::store::{RewardStore, StoreError};

/// Placeholder replaced by the winning actor.
pub const PLAYER_PLACEHOLDER: &str = "{player}";

/// Placeholder replaced by the contest name.
pub const CONTEST_PLACEHOLDER: &str = "{koth}";

/// Errors from reward table edits and command execution.
#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    /// The command is blank.
    #[error("reward command is empty")]
    EmptyCommand,

    /// The command is already in the table.
    #[error("reward command already registered: {command}")]
    DuplicateCommand {
        /// The normalized command.
        command: String,
    },

    /// The command is not in the table.
    #[error("reward command not found: {command}")]
    UnknownCommand {
        /// The requested command.
        command: String,
    },

    /// The host failed to run a rendered command.
    #[error("reward command failed: {message}")]
    Runner {
        /// Description of the failure.
        message: String,
    },

    /// The edited table could not be persisted.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },
}

/// Grants the reward for a won contest.
pub trait RewardDispatcher: Send + Sync {
    /// Reward `winner` for capturing `contest`.
    fn grant(&self, contest: &str, winner: &Winner);
}

/// Executes one rendered reward command on the host.
pub trait CommandRunner: Send + Sync {
    /// Run `command`.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Runner`] if the host rejected the command.
    fn run(&self, command: &str) -> Result<(), RewardError>;
}

/// Ordered, duplicate-free list of reward command templates.
#[derive(Default)]
pub struct RewardTable {
    commands: RwLock<Vec<String>>,
    store: Option<Arc<dyn RewardStore>>,
}

impl core::fmt::Debug for RewardTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RewardTable")
            .field("commands", &self.commands())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl RewardTable {
    /// Build an in-memory table from configured templates, dropping blanks
    /// and repeats.
    pub fn new(commands: &[String]) -> Self {
        Self {
            commands: RwLock::new(sanitize(commands)),
            store: None,
        }
    }

    /// Build a table backed by `store`.
    ///
    /// The stored list wins; `defaults` are used only when nothing has been
    /// stored yet, and are not written until the first edit.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Store`] if the stored list cannot be read.
    pub fn with_store(defaults: &[String], store: Arc<dyn RewardStore>) -> Result<Self, RewardError> {
        let commands = match store.load_reward_commands()? {
            Some(stored) => {
                info!(commands = stored.len(), "Reward commands loaded from store");
                sanitize(&stored)
            }
            None => sanitize(defaults),
        };
        Ok(Self {
            commands: RwLock::new(commands),
            store: Some(store),
        })
    }

    /// Append a template and return it as stored.
    ///
    /// Templates without a `{player}` placeholder are trimmed and given a
    /// leading `/`.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::EmptyCommand`],
    /// [`RewardError::DuplicateCommand`], or [`RewardError::Store`] if the
    /// change cannot be persisted (the table is left unchanged).
    pub fn add(&self, command: &str) -> Result<String, RewardError> {
        let mut commands = self.commands.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = commands.clone();
        let normalized = insert(&mut updated, command)?;
        self.persist(&updated)?;
        *commands = updated;
        debug!(command = %normalized, "Reward command added");
        Ok(normalized)
    }

    /// Remove a template exactly as stored.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::UnknownCommand`] if it is not in the table, or
    /// [`RewardError::Store`] if the change cannot be persisted.
    pub fn remove(&self, command: &str) -> Result<(), RewardError> {
        let mut commands = self.commands.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = commands.clone();
        let index = updated
            .iter()
            .position(|c| c == command)
            .ok_or_else(|| RewardError::UnknownCommand {
                command: command.to_owned(),
            })?;
        updated.remove(index);
        self.persist(&updated)?;
        *commands = updated;
        debug!(command, "Reward command removed");
        Ok(())
    }

    /// The templates in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every template with its placeholders filled in.
    pub fn render(&self, contest: &str, actor: ActorId) -> Vec<String> {
        let player = actor.to_string();
        self.commands
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|template| {
                template
                    .replace(PLAYER_PLACEHOLDER, &player)
                    .replace(CONTEST_PLACEHOLDER, contest)
            })
            .collect()
    }

    fn persist(&self, commands: &[String]) -> Result<(), RewardError> {
        if let Some(store) = &self.store {
            store.save_reward_commands(commands)?;
        }
        Ok(())
    }
}

/// Normalize `command` and append it, rejecting blanks and repeats.
fn insert(commands: &mut Vec<String>, command: &str) -> Result<String, RewardError> {
    let normalized = normalize(command).ok_or(RewardError::EmptyCommand)?;
    if commands.contains(&normalized) {
        return Err(RewardError::DuplicateCommand {
            command: normalized,
        });
    }
    commands.push(normalized.clone());
    Ok(normalized)
}

fn sanitize(commands: &[String]) -> Vec<String> {
    let mut kept = Vec::with_capacity(commands.len());
    for command in commands {
        if let Err(e) = insert(&mut kept, command) {
            warn!(command = %command, error = %e, "Ignoring reward command");
        }
    }
    kept
}

fn normalize(command: &str) -> Option<String> {
    let trimmed = command.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return None;
    }
    if trimmed.contains(PLAYER_PLACEHOLDER) || trimmed.starts_with('/') {
        Some(trimmed.to_owned())
    } else {
        Some(format!("/{trimmed}"))
    }
}

/// Dispatcher that runs every reward template for the winner.
pub struct CommandRewards {
    table: Arc<RewardTable>,
    runner: Arc<dyn CommandRunner>,
}

impl CommandRewards {
    /// Dispatch `table` through `runner`.
    pub fn new(table: Arc<RewardTable>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { table, runner }
    }

    /// The template table, for edits at runtime.
    pub fn table(&self) -> &Arc<RewardTable> {
        &self.table
    }
}

impl RewardDispatcher for CommandRewards {
    fn grant(&self, contest: &str, winner: &Winner) {
        let commands = self.table.render(contest, winner.actor);
        info!(
            contest,
            winner = %winner.actor,
            commands = commands.len(),
            "Granting capture reward"
        );
        for command in &commands {
            if let Err(e) = self.runner.run(command) {
                warn!(contest, command = %command, error = %e, "Reward command failed");
            }
        }
    }
}

/// Sink wrapper that grants rewards for won contests and forwards every
/// notification unchanged.
pub struct RewardRelay {
    inner: Arc<dyn EventSink>,
    rewards: Arc<dyn RewardDispatcher>,
}

impl RewardRelay {
    /// Wrap `inner`, granting through `rewards`.
    pub fn new(inner: Arc<dyn EventSink>, rewards: Arc<dyn RewardDispatcher>) -> Self {
        Self { inner, rewards }
    }
}

impl EventSink for RewardRelay {
    fn on_started(&self, contest: &str) {
        self.inner.on_started(contest);
    }

    fn on_capture_started(&self, contest: &str, actor: ActorId) {
        self.inner.on_capture_started(contest, actor);
    }

    fn on_capture_interrupted(&self, contest: &str, previous: ActorId) {
        self.inner.on_capture_interrupted(contest, previous);
    }

    fn on_progress(&self, contest: &str, holder: ActorId, remaining_seconds: u32) {
        self.inner.on_progress(contest, holder, remaining_seconds);
    }

    fn on_holder_progress(&self, contest: &str, actor: ActorId, fraction: f64, remaining_seconds: u32) {
        self.inner
            .on_holder_progress(contest, actor, fraction, remaining_seconds);
    }

    fn on_ended(&self, contest: &str, winner: Option<&Winner>) {
        self.inner.on_ended(contest, winner);
        if let Some(winner) = winner {
            self.rewards.grant(contest, winner);
        }
    }
}
