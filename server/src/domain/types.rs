//! Common domain types

use serde::{Deserialize, Serialize};

/// Detected dev framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameworkKind {
    Next,
    Vite,
    CreateReactApp,
    Custom,
}

impl FrameworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameworkKind::Next => "next",
            FrameworkKind::Vite => "vite",
            FrameworkKind::CreateReactApp => "create-react-app",
            FrameworkKind::Custom => "custom",
        }
    }
}

impl std::fmt::Display for FrameworkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dev server command chosen for a launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevCommandSpec {
    pub framework: FrameworkKind,
    pub script_name: String,
    pub shell_command: String,
    pub shell_args: Vec<String>,
    pub display_label: String,
    pub port: u16,
}
