//! Package manifest and package manager detection

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::file_tree::FileTree;

/// Manifest file name at the project root
pub const MANIFEST_FILE: &str = "package.json";

const PNPM_LOCKFILES: [&str; 2] = ["pnpm-lock.yaml", "pnpm-lock.yml"];
const YARN_LOCKFILE: &str = "yarn.lock";
const NPM_LOCKFILE: &str = "package-lock.json";

/// Structured package descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
}

impl PackageManifest {
    /// Parse manifest JSON text
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Exact dependency lookup across dependencies and devDependencies
    pub fn has_dependency(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }

    /// Script command text by name
    pub fn script(&self, name: &str) -> Option<&str> {
        self.scripts.get(name).map(String::as_str)
    }
}

/// Parse the root manifest of a tree.
///
/// Returns `None` when the manifest is absent or malformed; both are treated
/// the same by callers.
pub fn parse_manifest(tree: &FileTree) -> Option<PackageManifest> {
    let bytes = tree.file(MANIFEST_FILE)?;
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("{} is not valid UTF-8: {}", MANIFEST_FILE, e);
            return None;
        }
    };
    match PackageManifest::from_json(text) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!("Failed to parse {}: {}", MANIFEST_FILE, e);
            None
        }
    }
}

/// Package manager used to install and run the project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    #[default]
    Npm,
    Pnpm,
    Yarn,
}

impl PackageManagerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManagerKind::Npm => "npm",
            PackageManagerKind::Pnpm => "pnpm",
            PackageManagerKind::Yarn => "yarn",
        }
    }

    /// Executable name
    pub fn program(&self) -> &'static str {
        self.as_str()
    }

    /// Arguments for the install subcommand
    pub fn install_args(&self) -> Vec<String> {
        vec!["install".to_string()]
    }

    /// Arguments that run a manifest script
    pub fn run_args(&self, script: &str) -> Vec<String> {
        match self {
            PackageManagerKind::Npm => vec!["run".to_string(), script.to_string()],
            PackageManagerKind::Pnpm | PackageManagerKind::Yarn => vec![script.to_string()],
        }
    }

    /// Human-readable command that runs a manifest script
    pub fn run_label(&self, script: &str) -> String {
        let mut parts = vec![self.program().to_string()];
        parts.extend(self.run_args(script));
        parts.join(" ")
    }
}

impl std::fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect the package manager from root lockfiles: pnpm > yarn > npm.
pub fn detect_package_manager(tree: &FileTree) -> PackageManagerKind {
    if PNPM_LOCKFILES.iter().any(|f| tree.contains_file(f)) {
        PackageManagerKind::Pnpm
    } else if tree.contains_file(YARN_LOCKFILE) {
        PackageManagerKind::Yarn
    } else {
        PackageManagerKind::Npm
    }
}

/// Lockfile presence flags for a tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lockfiles {
    pub npm: bool,
    pub yarn: bool,
    pub pnpm: bool,
}

impl Lockfiles {
    pub fn scan(tree: &FileTree) -> Self {
        Self {
            npm: tree.contains_file(NPM_LOCKFILE),
            yarn: tree.contains_file(YARN_LOCKFILE),
            pnpm: PNPM_LOCKFILES.iter().any(|f| tree.contains_file(f)),
        }
    }
}
