//! Terminal rendering of hub status messages

use crate::hub::{StatusMessage, STATUS_MESSAGE_TYPE};
use crate::status::{OpState, Operation};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const SPINNER_TEMPLATE: &str = "  {spinner:.cyan} {msg}";
const BAR_TEMPLATE: &str =
    "  {spinner:.cyan} {msg} [{bar:30.cyan/dim}] {bytes}/{total_bytes} ({eta})";

/// What one operation update looks like on the terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Bytes { label: String, done: u64, total: u64 },
    Message(String),
    Done,
    Failed(String),
}

pub(crate) fn step_of(op: &Operation) -> Step {
    let name = op
        .mod_info
        .as_ref()
        .map(|m| m.name.clone())
        .unwrap_or_default();
    let bytes = |done: &str| Step::Bytes {
        label: state_label(op.state).to_string(),
        done: op.data.get(done).and_then(|v| v.as_u64()).unwrap_or(0),
        total: op.data.get("total_bytes").and_then(|v| v.as_u64()).unwrap_or(0),
    };

    match op.state {
        OpState::Downloading if op.data.contains_key("total_bytes") => bytes("downloaded_bytes"),
        OpState::Copying if op.data.contains_key("total_bytes") => bytes("copied_bytes"),
        OpState::InstallingDependency => Step::Message(format!("Installing dependency {}", name)),
        OpState::WaitForFile => {
            let folder = op
                .data
                .get("download_folder")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let timeout = op.data.get("timeout").and_then(|v| v.as_u64()).unwrap_or(0);
            Step::Message(format!(
                "Download refused; save the archive into {} (waiting {}s)",
                folder, timeout
            ))
        }
        OpState::Done => Step::Done,
        OpState::Error => {
            let message = op
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            Step::Failed(format!("{} ({})", message, op.code().unwrap_or("exception")))
        }
        state => Step::Message(state_label(state).to_string()),
    }
}

fn state_label(state: OpState) -> &'static str {
    match state {
        OpState::GetModInfo => "Fetching mod info",
        OpState::GetDependencies => "Resolving dependencies",
        OpState::InstallingDependency => "Installing dependency",
        OpState::GetDownloadUrl => "Resolving download",
        OpState::Downloading => "Downloading",
        OpState::WaitForFile => "Waiting for file",
        OpState::Unzip => "Extracting",
        OpState::Copying => "Copying",
        OpState::RemoveFolder => "Removing files",
        OpState::RemoveDatabaseEntry => "Updating database",
        OpState::Done => "Done",
        OpState::Error => "Error",
    }
}

/// Spinner that switches to a byte bar while downloading or copying
pub(crate) struct ProgressView {
    bar: ProgressBar,
    channel: String,
    showing_bytes: bool,
}

impl ProgressView {
    pub fn new(channel: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self {
            bar,
            channel: channel.to_string(),
            showing_bytes: false,
        }
    }

    /// Render one raw hub message. Non-status traffic is ignored.
    pub fn handle(&mut self, raw: &str) {
        let Ok(message) = serde_json::from_str::<StatusMessage>(raw) else {
            return;
        };
        if message.kind != STATUS_MESSAGE_TYPE {
            return;
        }
        let Some(op) = message.payload.operation.as_ref() else {
            return;
        };

        let prefix = if message.channel == self.channel {
            String::new()
        } else {
            format!("[{}] ", message.channel)
        };

        match step_of(op) {
            Step::Bytes { label, done, total } => {
                if !self.showing_bytes {
                    self.bar.set_style(bar_style());
                    self.showing_bytes = true;
                }
                self.bar.set_length(total);
                self.bar.set_position(done);
                self.bar.set_message(format!("{}{}", prefix, label));
            }
            Step::Message(text) => {
                self.reset_style();
                self.bar.set_message(format!("{}{}", prefix, text));
            }
            Step::Done => {
                self.reset_style();
                if prefix.is_empty() {
                    self.bar.set_message("Done");
                } else {
                    self.bar.println(format!("  {}done", prefix));
                }
            }
            Step::Failed(text) => {
                self.bar.println(format!("  {}failed: {}", prefix, text));
            }
        }
    }

    pub fn finish(&self) {
        self.bar.finish();
    }

    fn reset_style(&mut self) {
        if self.showing_bytes {
            self.bar.set_style(spinner_style());
            self.showing_bytes = false;
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(SPINNER_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸━")
}
