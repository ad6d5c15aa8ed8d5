//! Observer bridge
//!
//! Holds the lifecycle record the UI reads. Writers are the orchestrator and
//! its background tasks; readers take snapshots or subscribe to changes.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::domain::file_tree::TreeEntry;
use crate::domain::lifecycle::{ConsoleLevel, ConsoleLine, LifecycleSnapshot, LifecycleStatus};
use crate::service::output::classify_chunk;

const INSTALL_PROGRESS_START: u8 = 10;
const INSTALL_PROGRESS_STEP: u8 = 3;
const INSTALL_PROGRESS_CAP: u8 = 94;

/// Shared lifecycle record with change notification
pub struct LifecycleBridge {
    state: watch::Sender<LifecycleSnapshot>,
    tree: watch::Sender<Vec<TreeEntry>>,
    next_line_id: AtomicU64,
    max_console_lines: usize,
}

impl LifecycleBridge {
    pub fn new(max_console_lines: usize) -> Self {
        Self {
            state: watch::Sender::new(LifecycleSnapshot::default()),
            tree: watch::Sender::new(Vec::new()),
            next_line_id: AtomicU64::new(1),
            max_console_lines: max_console_lines.max(1),
        }
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleSnapshot> {
        self.state.subscribe()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.state.borrow().status
    }

    /// Apply an arbitrary change and notify subscribers
    pub fn update(&self, f: impl FnOnce(&mut LifecycleSnapshot)) {
        self.state.send_modify(f);
    }

    /// Move to `status` and record `message` as the last message
    pub fn set_status(&self, status: LifecycleStatus, message: impl Into<String>) {
        let message = message.into();
        info!("Lifecycle -> {}: {}", status.as_str(), message);
        self.state.send_modify(|s| {
            s.status = status;
            s.last_message = Some(message);
        });
    }

    /// Clear everything from the previous launch and enter `initializing`
    pub fn begin_launch(&self, message: impl Into<String>) {
        let message = message.into();
        info!("Lifecycle -> {}: {}", LifecycleStatus::Initializing.as_str(), message);
        self.state.send_replace(LifecycleSnapshot {
            status: LifecycleStatus::Initializing,
            last_message: Some(message),
            ..Default::default()
        });
        self.tree.send_replace(Vec::new());
    }

    /// Enter `error` with `message`
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        error!("Lifecycle -> error: {}", message);
        self.push_line(ConsoleLevel::Error, message.clone());
        self.state.send_modify(|s| {
            s.status = LifecycleStatus::Error;
            s.last_message = Some(message.clone());
            s.error = Some(message);
        });
    }

    /// Append one console line
    pub fn push_line(&self, level: ConsoleLevel, text: impl Into<String>) {
        let text = text.into();
        match level {
            ConsoleLevel::Error => error!(target: "console", "{}", text),
            ConsoleLevel::Warn => warn!(target: "console", "{}", text),
            ConsoleLevel::Info => {}
        }
        let line = ConsoleLine {
            id: self.next_line_id.fetch_add(1, Ordering::Relaxed),
            text,
            level,
            timestamp: Utc::now(),
        };
        let cap = self.max_console_lines;
        self.state.send_modify(|s| {
            s.console.push(line);
            if s.console.len() > cap {
                let excess = s.console.len() - cap;
                s.console.drain(..excess);
            }
        });
    }

    /// Classify a raw output chunk into console lines, returning how many were added
    pub fn push_output(&self, chunk: &str) -> usize {
        let lines = classify_chunk(chunk);
        let count = lines.len();
        for (level, text) in lines {
            self.push_line(level, text);
        }
        count
    }

    /// Console lines with an id greater than `since`
    pub fn console_since(&self, since: u64) -> Vec<ConsoleLine> {
        self.state
            .borrow()
            .console
            .iter()
            .filter(|line| line.id > since)
            .cloned()
            .collect()
    }

    /// Nudge the cosmetic install estimate, staying below 95
    pub fn bump_install_progress(&self) {
        self.state.send_modify(|s| {
            s.install_progress = if s.install_progress < INSTALL_PROGRESS_START {
                INSTALL_PROGRESS_START
            } else {
                s.install_progress
                    .saturating_add(INSTALL_PROGRESS_STEP)
                    .min(INSTALL_PROGRESS_CAP)
            };
        });
    }

    pub fn publish_tree(&self, entries: Vec<TreeEntry>) {
        self.tree.send_replace(entries);
    }

    pub fn tree(&self) -> Vec<TreeEntry> {
        self.tree.borrow().clone()
    }
}
