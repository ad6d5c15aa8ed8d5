//! Dev server command inference
//!
//! Rules are evaluated in a fixed order and the first match wins. The order
//! matters: a project that declares `next` is always treated as Next.js even
//! if it also pulls in Vite.

use tracing::debug;

use crate::domain::package::{PackageManagerKind, PackageManifest};
use crate::domain::types::{DevCommandSpec, FrameworkKind};

const NEXT_PORT: u16 = 3000;
const VITE_PORT: u16 = 5173;
const CRA_PORT: u16 = 3000;
const CUSTOM_PORT: u16 = 3000;

/// Interactive fallback used when no rule matches.
///
/// Receives a message and a suggested script; returns the chosen script or
/// `None` when the user declines.
pub trait CommandPrompt: Send + Sync {
    fn prompt(&self, message: &str, default: &str) -> Option<String>;
}

impl<F> CommandPrompt for F
where
    F: Fn(&str, &str) -> Option<String> + Send + Sync,
{
    fn prompt(&self, message: &str, default: &str) -> Option<String> {
        self(message, default)
    }
}

/// Non-interactive prompt that always answers with a configured script
#[derive(Debug, Clone)]
pub struct ConfiguredScript(pub String);

impl CommandPrompt for ConfiguredScript {
    fn prompt(&self, message: &str, _default: &str) -> Option<String> {
        debug!("{} -> answering with configured script {}", message, self.0);
        Some(self.0.clone())
    }
}

fn lower_script(manifest: &PackageManifest, name: &str) -> Option<String> {
    manifest.script(name).map(str::to_lowercase)
}

fn is_next(manifest: &PackageManifest, dev: Option<&str>) -> bool {
    let turbo_dev = dev.is_some_and(|s| s.contains("turbo") && s.contains("dev"));
    dev.is_some_and(|s| s.contains("next")) || manifest.has_dependency("next") || turbo_dev
}

fn is_vite(manifest: &PackageManifest, dev: Option<&str>) -> bool {
    dev.is_some_and(|s| s.contains("vite")) || manifest.has_dependency("vite")
}

fn is_cra(manifest: &PackageManifest, start: Option<&str>) -> bool {
    start.is_some_and(|s| s.contains("react-scripts")) || manifest.has_dependency("react-scripts")
}

fn build(
    framework: FrameworkKind,
    script: &str,
    port: u16,
    package_manager: PackageManagerKind,
) -> DevCommandSpec {
    DevCommandSpec {
        framework,
        script_name: script.to_string(),
        shell_command: package_manager.program().to_string(),
        shell_args: package_manager.run_args(script),
        display_label: package_manager.run_label(script),
        port,
    }
}

/// Decide which dev command to run, or `None` when nothing fits.
pub fn infer_dev_command(
    manifest: Option<&PackageManifest>,
    package_manager: PackageManagerKind,
    prompt: Option<&dyn CommandPrompt>,
) -> Option<DevCommandSpec> {
    let manifest = manifest?;
    let dev = lower_script(manifest, "dev");
    let start = lower_script(manifest, "start");

    if is_next(manifest, dev.as_deref()) {
        return Some(build(FrameworkKind::Next, "dev", NEXT_PORT, package_manager));
    }
    if is_vite(manifest, dev.as_deref()) {
        return Some(build(FrameworkKind::Vite, "dev", VITE_PORT, package_manager));
    }
    if is_cra(manifest, start.as_deref()) {
        return Some(build(
            FrameworkKind::CreateReactApp,
            "start",
            CRA_PORT,
            package_manager,
        ));
    }
    if dev.is_some() {
        return Some(build(FrameworkKind::Custom, "dev", CUSTOM_PORT, package_manager));
    }
    if start.is_some() {
        return Some(build(FrameworkKind::Custom, "start", CUSTOM_PORT, package_manager));
    }

    let prompt = prompt?;
    let suggestion = manifest.scripts.keys().next()?;
    let available = manifest
        .scripts
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let message = format!(
        "Could not detect a dev server command. Which script should be run? ({})",
        available
    );

    let answer = prompt.prompt(&message, suggestion)?;
    let script = answer.trim();
    if script.is_empty() {
        return None;
    }
    Some(build(FrameworkKind::Custom, script, CUSTOM_PORT, package_manager))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn manifest(scripts: &[(&str, &str)], deps: &[&str], dev_deps: &[&str]) -> PackageManifest {
        let to_map = |names: &[&str]| -> BTreeMap<String, String> {
            names.iter().map(|n| (n.to_string(), "*".to_string())).collect()
        };
        PackageManifest {
            scripts: scripts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            dependencies: to_map(deps),
            dev_dependencies: to_map(dev_deps),
        }
    }

    #[test]
    fn no_manifest_yields_none() {
        assert!(infer_dev_command(None, PackageManagerKind::Npm, None).is_none());
    }

    #[test]
    fn next_dependency_command_text_per_package_manager() {
        let m = manifest(&[("dev", "next dev")], &["next", "react"], &[]);
        for (pm, label) in [
            (PackageManagerKind::Npm, "npm run dev"),
            (PackageManagerKind::Yarn, "yarn dev"),
            (PackageManagerKind::Pnpm, "pnpm dev"),
        ] {
            let command = infer_dev_command(Some(&m), pm, None).unwrap();
            assert_eq!(command.framework, FrameworkKind::Next);
            assert_eq!(command.port, 3000);
            assert_eq!(command.display_label, label);
            assert_eq!(command.shell_command, pm.as_str());
        }
    }

    #[test]
    fn next_dependency_without_dev_script_still_wins() {
        let m = manifest(&[("start", "node server.js")], &["next"], &[]);
        let command = infer_dev_command(Some(&m), PackageManagerKind::Npm, None).unwrap();
        assert_eq!(command.framework, FrameworkKind::Next);
        assert_eq!(command.script_name, "dev");
    }

    #[test]
    fn turbo_dev_passthrough_is_next() {
        let m = manifest(&[("dev", "turbo run dev --parallel")], &[], &["turbo"]);
        let command = infer_dev_command(Some(&m), PackageManagerKind::Pnpm, None).unwrap();
        assert_eq!(command.framework, FrameworkKind::Next);
        assert_eq!(command.shell_args, vec!["dev".to_string()]);
    }

    #[test]
    fn next_beats_vite() {
        let m = manifest(&[("dev", "vite")], &["next"], &["vite"]);
        let command = infer_dev_command(Some(&m), PackageManagerKind::Npm, None).unwrap();
        assert_eq!(command.framework, FrameworkKind::Next);
    }

    #[test]
    fn vite_detected_case_insensitively() {
        let m = manifest(&[("dev", "VITE --host")], &[], &[]);
        let command = infer_dev_command(Some(&m), PackageManagerKind::Npm, None).unwrap();
        assert_eq!(command.framework, FrameworkKind::Vite);
        assert_eq!(command.port, 5173);
        assert_eq!(command.shell_args, vec!["run".to_string(), "dev".to_string()]);
    }

    #[test]
    fn react_scripts_start_is_cra() {
        let m = manifest(&[("start", "react-scripts start")], &["react"], &[]);
        let command = infer_dev_command(Some(&m), PackageManagerKind::Yarn, None).unwrap();
        assert_eq!(command.framework, FrameworkKind::CreateReactApp);
        assert_eq!(command.script_name, "start");
        assert_eq!(command.display_label, "yarn start");
        assert_eq!(command.port, 3000);
    }

    #[test]
    fn plain_dev_script_is_custom() {
        let m = manifest(&[("dev", "node server.js")], &[], &[]);
        let command = infer_dev_command(Some(&m), PackageManagerKind::Npm, None).unwrap();
        assert_eq!(command.framework, FrameworkKind::Custom);
        assert_eq!(command.script_name, "dev");
        assert_eq!(command.port, 3000);
    }

    #[test]
    fn plain_start_script_is_custom() {
        let m = manifest(&[("start", "node index.js"), ("build", "tsc")], &[], &[]);
        let command = infer_dev_command(Some(&m), PackageManagerKind::Npm, None).unwrap();
        assert_eq!(command.framework, FrameworkKind::Custom);
        assert_eq!(command.script_name, "start");
    }

    #[test]
    fn empty_scripts_without_prompt_is_none() {
        let m = manifest(&[], &[], &[]);
        assert!(infer_dev_command(Some(&m), PackageManagerKind::Npm, None).is_none());
    }

    #[test]
    fn empty_scripts_with_prompt_is_none() {
        let m = manifest(&[], &[], &[]);
        let prompt = |_: &str, _: &str| Some("serve".to_string());
        assert!(infer_dev_command(Some(&m), PackageManagerKind::Npm, Some(&prompt)).is_none());
    }

    #[test]
    fn prompt_suggests_first_script_and_uses_answer() {
        let m = manifest(&[("serve", "http-server"), ("build", "tsc")], &[], &[]);
        let seen = Mutex::new(None);
        let prompt = |_: &str, default: &str| {
            *seen.lock().unwrap() = Some(default.to_string());
            Some("  serve ".to_string())
        };
        let command = infer_dev_command(Some(&m), PackageManagerKind::Pnpm, Some(&prompt)).unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("build"));
        assert_eq!(command.framework, FrameworkKind::Custom);
        assert_eq!(command.script_name, "serve");
        assert_eq!(command.display_label, "pnpm serve");
    }

    #[test]
    fn declined_or_blank_prompt_is_none() {
        let m = manifest(&[("build", "tsc")], &[], &[]);
        let declined = |_: &str, _: &str| -> Option<String> { None };
        assert!(infer_dev_command(Some(&m), PackageManagerKind::Npm, Some(&declined)).is_none());
        let blank = |_: &str, _: &str| Some("   ".to_string());
        assert!(infer_dev_command(Some(&m), PackageManagerKind::Npm, Some(&blank)).is_none());
    }

    #[test]
    fn configured_script_answers_prompt() {
        let m = manifest(&[("serve", "node srv.js")], &[], &[]);
        let prompt = ConfiguredScript("serve".to_string());
        let command = infer_dev_command(Some(&m), PackageManagerKind::Npm, Some(&prompt)).unwrap();
        assert_eq!(command.display_label, "npm run serve");
    }
}
