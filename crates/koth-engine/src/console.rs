//! Reward command runner for the standalone daemon.
//!
//! Without a host server to execute commands on, rendered reward commands
//! are written to the log under the `koth::reward` target, where an
//! operator or a log shipper can pick them up.

use koth_core::reward::{CommandRunner, RewardError};
use tracing::info;

/// Runner that logs each rendered command.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleRunner;

impl CommandRunner for ConsoleRunner {
    fn run(&self, command: &str) -> Result<(), RewardError> {
        info!(target: "koth::reward", command, "Reward command dispatched");
        Ok(())
    }
}
