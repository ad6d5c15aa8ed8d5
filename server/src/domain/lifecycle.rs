//! Sandbox lifecycle domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::package::PackageManagerKind;
use super::types::FrameworkKind;

/// Externally observable orchestrator status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleStatus {
    /// Nothing running
    #[default]
    Idle,
    /// Booting the sandbox and mounting files
    Initializing,
    /// Package manager install in progress
    InstallingDependencies,
    /// Dev server spawned, waiting for the host ready signal
    StartingDevServer,
    /// Dev server reported ready
    Ready,
    /// Launch failed
    Error,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Idle => "idle",
            LifecycleStatus::Initializing => "initializing",
            LifecycleStatus::InstallingDependencies => "installing-dependencies",
            LifecycleStatus::StartingDevServer => "starting-dev-server",
            LifecycleStatus::Ready => "ready",
            LifecycleStatus::Error => "error",
        }
    }

    /// Whether a launch is in flight
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::Initializing
                | LifecycleStatus::InstallingDependencies
                | LifecycleStatus::StartingDevServer
        )
    }
}

/// Why a managed process ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    /// Exited on its own
    #[default]
    None,
    /// Stopped by an explicit user action
    User,
    /// Superseded by a new launch
    Restart,
}

/// Console line severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Info,
    Warn,
    Error,
}

/// One logical line of process or lifecycle output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub id: u64,
    pub text: String,
    pub level: ConsoleLevel,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle record read by observers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LifecycleSnapshot {
    pub status: LifecycleStatus,
    /// Cosmetic estimate, not a measurement
    pub install_progress: u8,
    pub install_phase: Option<String>,
    pub package_manager: Option<PackageManagerKind>,
    pub framework: Option<FrameworkKind>,
    pub dev_command: Option<String>,
    pub preview_port: Option<u16>,
    pub preview_url: Option<String>,
    pub last_message: Option<String>,
    pub error: Option<String>,
    pub console: Vec<ConsoleLine>,
}
