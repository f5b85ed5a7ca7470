//! Announcer: renders contest events with the configured message templates.
//!
//! The daemon has no chat surface, so announcements go to the log under the
//! `koth::announce` target. Broadcasts are logged at `info`; lines addressed
//! to a single actor carry a `to` field; the per-tick progress bar is logged
//! at `debug`.

use koth_core::config::MessagesConfig;
use koth_core::sink::{EventSink, Winner};
use koth_types::ActorId;
use tracing::{debug, info};

/// Width of the holder progress bar, in cells.
const BAR_WIDTH: u32 = 20;

/// Event sink that turns notifications into announcement lines.
#[derive(Debug, Clone)]
pub struct Announcer {
    messages: MessagesConfig,
}

impl Announcer {
    /// Announce with the given templates.
    pub const fn new(messages: MessagesConfig) -> Self {
        Self { messages }
    }

    fn line(&self, template: &str, values: &[(&str, &str)]) -> String {
        format!("{} {}", self.messages.prefix, render(template, values))
    }
}

impl EventSink for Announcer {
    fn on_started(&self, contest: &str) {
        let line = self.line(&self.messages.started, &[("name", contest)]);
        info!(target: "koth::announce", contest, "{line}");
    }

    fn on_capture_started(&self, contest: &str, actor: ActorId) {
        let line = self.line(&self.messages.start_capture, &[("name", contest)]);
        info!(target: "koth::announce", contest, to = %actor, "{line}");
    }

    fn on_capture_interrupted(&self, contest: &str, previous: ActorId) {
        let line = self.line(&self.messages.leave_capture, &[("name", contest)]);
        info!(target: "koth::announce", contest, to = %previous, "{line}");
    }

    fn on_progress(&self, contest: &str, _holder: ActorId, remaining_seconds: u32) {
        let time = format_time(remaining_seconds);
        let line = self.line(
            &self.messages.time_remaining,
            &[("name", contest), ("time", &time)],
        );
        info!(target: "koth::announce", contest, "{line}");
    }

    fn on_holder_progress(&self, contest: &str, actor: ActorId, fraction: f64, remaining_seconds: u32) {
        debug!(
            target: "koth::announce",
            contest,
            to = %actor,
            "{} {}",
            progress_bar(fraction, BAR_WIDTH),
            format_time(remaining_seconds)
        );
    }

    fn on_ended(&self, contest: &str, winner: Option<&Winner>) {
        let line = match winner {
            Some(winner) => {
                let player = winner.actor.to_string();
                self.line(
                    &self.messages.captured,
                    &[("name", contest), ("player", &player)],
                )
            }
            None => self.line(&self.messages.ended, &[("name", contest)]),
        };
        info!(target: "koth::announce", contest, "{line}");
    }
}

/// Replace every `{key}` in `template` with its value.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_owned(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        })
}

/// `m:ss` rendering of a countdown.
pub fn format_time(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Text progress bar such as `[#####---------------] 25%`.
pub fn progress_bar(fraction: f64, width: u32) -> String {
    let fraction = fraction.clamp(0.0, 1.0);
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let filled = (fraction * f64::from(width)).round() as u32;
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let percent = (fraction * 100.0).round() as u32;
    let filled = filled.min(width);
    let empty = width.saturating_sub(filled);
    format!(
        "[{}{}] {percent}%",
        "#".repeat(filled as usize),
        "-".repeat(empty as usize)
    )
}
