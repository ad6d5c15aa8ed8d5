//! Server configuration

use serde::Deserialize;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Sandbox backend: "local" or "docker"
    #[serde(default = "default_sandbox_backend")]
    pub sandbox_backend: String,

    /// Base directory where sandbox instance trees are written
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,

    /// Host path for workspace directory (for Docker volume mounting)
    /// When the server runs in Docker, this is the path on the host machine
    /// that maps to workspace_dir inside the server container.
    #[serde(default)]
    pub workspace_host_dir: Option<String>,

    /// Base image for docker sandboxes
    #[serde(default = "default_base_image")]
    pub base_image: String,

    /// Docker network for sandbox containers
    #[serde(default)]
    pub docker_network: Option<String>,

    /// Code host API base URL
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Optional API token for the code host
    #[serde(default)]
    pub github_token: Option<String>,

    /// Files larger than this are skipped during repository sync
    #[serde(default = "default_sync_max_file_bytes")]
    pub sync_max_file_bytes: u64,

    /// Concurrent file downloads during repository sync
    #[serde(default = "default_sync_concurrency")]
    pub sync_concurrency: usize,

    /// Readiness probe interval in milliseconds
    #[serde(default = "default_ready_poll_ms")]
    pub ready_poll_ms: u64,

    /// Dev server startup timeout in seconds (0 = wait forever)
    #[serde(default)]
    pub startup_timeout_secs: u64,

    /// Console lines retained per launch
    #[serde(default = "default_max_console_lines")]
    pub max_console_lines: usize,

    /// Script answered when the run command cannot be inferred
    #[serde(default)]
    pub fallback_script: Option<String>,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_sandbox_backend() -> String {
    "local".to_string()
}

fn default_workspace_dir() -> String {
    "/tmp/devshell".to_string()
}

fn default_base_image() -> String {
    "node:20-bookworm".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_sync_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_sync_concurrency() -> usize {
    8
}

fn default_ready_poll_ms() -> u64 {
    500
}

fn default_max_console_lines() -> usize {
    5000
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        Ok(Self::from_lookup(|key| std::env::var(key).ok()))
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(val) = lookup("DEVSHELL_HTTP_HOST") {
            config.http_host = val;
        }
        if let Some(port) = lookup("DEVSHELL_HTTP_PORT").and_then(|v| v.parse().ok()) {
            config.http_port = port;
        }
        if let Some(val) = lookup("DEVSHELL_SANDBOX_BACKEND") {
            config.sandbox_backend = val.to_lowercase();
        }
        if let Some(val) = lookup("DEVSHELL_WORKSPACE_DIR") {
            config.workspace_dir = val;
        }
        if let Some(val) = lookup("DEVSHELL_WORKSPACE_HOST_DIR") {
            config.workspace_host_dir = Some(val);
        }
        if let Some(val) = lookup("DEVSHELL_BASE_IMAGE") {
            config.base_image = val;
        }
        if let Some(val) = lookup("DEVSHELL_DOCKER_NETWORK") {
            config.docker_network = Some(val);
        }
        if let Some(val) = lookup("DEVSHELL_GITHUB_API_URL") {
            config.github_api_url = val.trim_end_matches('/').to_string();
        }
        if let Some(val) = lookup("DEVSHELL_GITHUB_TOKEN").filter(|v| !v.is_empty()) {
            config.github_token = Some(val);
        }
        if let Some(bytes) = lookup("DEVSHELL_SYNC_MAX_FILE_BYTES").and_then(|v| v.parse().ok()) {
            config.sync_max_file_bytes = bytes;
        }
        if let Some(n) = lookup("DEVSHELL_SYNC_CONCURRENCY").and_then(|v| v.parse().ok()) {
            config.sync_concurrency = std::cmp::max(n, 1);
        }
        if let Some(ms) = lookup("DEVSHELL_READY_POLL_MS").and_then(|v| v.parse().ok()) {
            config.ready_poll_ms = ms;
        }
        if let Some(secs) = lookup("DEVSHELL_STARTUP_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.startup_timeout_secs = secs;
        }
        if let Some(n) = lookup("DEVSHELL_MAX_CONSOLE_LINES").and_then(|v| v.parse().ok()) {
            config.max_console_lines = n;
        }
        if let Some(val) = lookup("DEVSHELL_FALLBACK_SCRIPT").filter(|v| !v.trim().is_empty()) {
            config.fallback_script = Some(val.trim().to_string());
        }
        if let Some(val) = lookup("DEVSHELL_LOG_FORMAT") {
            config.log_format = val.to_lowercase();
        }

        config
    }

    /// Get the host path for a sandbox instance directory
    /// This is the path that should be bind-mounted into sandbox containers
    pub fn get_instance_host_path(&self, instance_id: &str) -> String {
        let base = self
            .workspace_host_dir
            .as_deref()
            .unwrap_or(&self.workspace_dir);
        format!("{}/{}", base.trim_end_matches('/'), instance_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            sandbox_backend: default_sandbox_backend(),
            workspace_dir: default_workspace_dir(),
            workspace_host_dir: None,
            base_image: default_base_image(),
            docker_network: None,
            github_api_url: default_github_api_url(),
            github_token: None,
            sync_max_file_bytes: default_sync_max_file_bytes(),
            sync_concurrency: default_sync_concurrency(),
            ready_poll_ms: default_ready_poll_ms(),
            startup_timeout_secs: 0,
            max_console_lines: default_max_console_lines(),
            fallback_script: None,
            log_format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.sandbox_backend, "local");
        assert_eq!(config.startup_timeout_secs, 0);
        assert!(config.github_token.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = config_from(&[
            ("DEVSHELL_HTTP_PORT", "9000"),
            ("DEVSHELL_SANDBOX_BACKEND", "Docker"),
            ("DEVSHELL_GITHUB_API_URL", "http://localhost:3001/"),
            ("DEVSHELL_SYNC_CONCURRENCY", "0"),
            ("DEVSHELL_FALLBACK_SCRIPT", "  serve "),
        ]);
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.sandbox_backend, "docker");
        assert_eq!(config.github_api_url, "http://localhost:3001");
        assert_eq!(config.sync_concurrency, 1);
        assert_eq!(config.fallback_script.as_deref(), Some("serve"));
    }

    #[test]
    fn unparseable_numbers_keep_defaults() {
        let config = config_from(&[("DEVSHELL_HTTP_PORT", "eighty")]);
        assert_eq!(config.http_port, 8080);
    }

    #[test]
    fn instance_host_path_prefers_host_dir() {
        let mut config = Config::default();
        assert_eq!(config.get_instance_host_path("abc"), "/tmp/devshell/abc");
        config.workspace_host_dir = Some("/srv/devshell/".to_string());
        assert_eq!(config.get_instance_host_path("abc"), "/srv/devshell/abc");
    }
}
