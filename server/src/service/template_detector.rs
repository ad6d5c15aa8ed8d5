//! Starter template detection from repository signals

use serde::{Deserialize, Serialize};

use crate::domain::file_tree::FileTree;
use crate::domain::package::{parse_manifest, Lockfiles, PackageManifest};
use crate::domain::repository::TemplateId;

/// Reason returned when no framework signal matches
pub const UNDETERMINED_REASON: &str =
    "unable to determine a suitable template from repository metadata";

const NEXT_CONFIG_FILES: [&str; 4] = [
    "next.config.js",
    "next.config.mjs",
    "next.config.ts",
    "next.config.cjs",
];
const VITE_CONFIG_FILES: [&str; 4] = [
    "vite.config.js",
    "vite.config.mjs",
    "vite.config.ts",
    "vite.config.cjs",
];

/// How much a detection can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Manifest and metadata signals for a repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSignals {
    pub package_json: Option<PackageManifest>,
    pub has_package_lock: bool,
    pub has_yarn_lock: bool,
    pub has_pnpm_lock: bool,
    pub has_next_config: bool,
    pub has_vite_config: bool,
    pub repo_name: Option<String>,
    pub repo_description: Option<String>,
}

impl TemplateSignals {
    /// Collect signals from a synchronized tree plus repository metadata
    pub fn from_tree(tree: &FileTree, repo_name: Option<&str>, repo_description: Option<&str>) -> Self {
        let lockfiles = Lockfiles::scan(tree);
        Self {
            package_json: parse_manifest(tree),
            has_package_lock: lockfiles.npm,
            has_yarn_lock: lockfiles.yarn,
            has_pnpm_lock: lockfiles.pnpm,
            has_next_config: NEXT_CONFIG_FILES.iter().any(|f| tree.contains_file(f)),
            has_vite_config: VITE_CONFIG_FILES.iter().any(|f| tree.contains_file(f)),
            repo_name: repo_name.map(str::to_string),
            repo_description: repo_description.map(str::to_string),
        }
    }

    fn has_dependency(&self, name: &str) -> bool {
        self.package_json
            .as_ref()
            .is_some_and(|m| m.has_dependency(name))
    }

    fn mentions(&self, needles: &[&str]) -> bool {
        [&self.repo_name, &self.repo_description]
            .into_iter()
            .flatten()
            .map(|text| text.to_lowercase())
            .any(|text| needles.iter().any(|n| text.contains(n)))
    }
}

/// Result of template detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDetection {
    pub template_id: Option<TemplateId>,
    pub confidence: Confidence,
    pub reason: String,
}

impl TemplateDetection {
    fn matched(id: &str, confidence: Confidence, reason: &str) -> Self {
        Self {
            template_id: Some(TemplateId::from(id)),
            confidence,
            reason: reason.to_string(),
        }
    }

    fn undetermined() -> Self {
        Self {
            template_id: None,
            confidence: Confidence::Low,
            reason: UNDETERMINED_REASON.to_string(),
        }
    }
}

fn detect_next(signals: &TemplateSignals) -> Option<TemplateDetection> {
    let id = TemplateId::NEXTJS_STARTER;
    if signals.has_dependency("next") {
        Some(TemplateDetection::matched(id, Confidence::High, "next dependency declared in package.json"))
    } else if signals.has_next_config {
        Some(TemplateDetection::matched(id, Confidence::Medium, "next.config file present"))
    } else if signals.mentions(&["next"]) {
        Some(TemplateDetection::matched(id, Confidence::Low, "repository name or description mentions Next.js"))
    } else {
        None
    }
}

fn detect_vite(signals: &TemplateSignals) -> Option<TemplateDetection> {
    let id = TemplateId::VITE_REACT_STARTER;
    if signals.has_dependency("vite") {
        Some(TemplateDetection::matched(id, Confidence::High, "vite dependency declared in package.json"))
    } else if signals.has_vite_config {
        Some(TemplateDetection::matched(id, Confidence::Medium, "vite.config file present"))
    } else if signals.mentions(&["vite"]) {
        Some(TemplateDetection::matched(id, Confidence::Low, "repository name or description mentions Vite"))
    } else {
        None
    }
}

fn detect_cra(signals: &TemplateSignals) -> Option<TemplateDetection> {
    let id = TemplateId::CRA_STARTER;
    if signals.has_dependency("react-scripts") {
        Some(TemplateDetection::matched(id, Confidence::High, "react-scripts dependency declared in package.json"))
    } else if signals.mentions(&["create-react-app", "react-scripts"]) {
        Some(TemplateDetection::matched(id, Confidence::Low, "repository name or description mentions Create React App"))
    } else if signals.has_yarn_lock && signals.has_dependency("react") && signals.has_dependency("react-dom") {
        Some(TemplateDetection::matched(id, Confidence::Low, "yarn lockfile with react and react-dom dependencies"))
    } else {
        None
    }
}

/// Classify a repository into a starter template.
///
/// Frameworks are tried in strict priority next, vite, create-react-app and
/// the first one with any signal wins, regardless of how strong a later
/// framework's signal would be.
pub fn detect_template(signals: &TemplateSignals) -> TemplateDetection {
    detect_next(signals)
        .or_else(|| detect_vite(signals))
        .or_else(|| detect_cra(signals))
        .unwrap_or_else(TemplateDetection::undetermined)
}
