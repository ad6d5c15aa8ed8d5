//! Shared helpers for the Devshell Server integration tests
//!
//! The tests talk to a running server. Set `DEVSHELL_TEST_URL` (for example
//! `http://127.0.0.1:8080`) to enable them; without it every test returns
//! early.

use std::sync::Once;
use std::time::Duration;

use serde::{Deserialize, Serialize};

static TRACING: Once = Once::new();

/// Connection settings for the server under test
pub struct TestConfig {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestConfig {
    /// Build from `DEVSHELL_TEST_URL`, or `None` when it is unset
    pub fn from_env() -> Option<Self> {
        TRACING.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });

        let base_url = std::env::var("DEVSHELL_TEST_URL").ok()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .ok()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    pub async fn session(&self) -> anyhow::Result<SessionResponse> {
        let response = self.client.get(self.api_url("/session")).send().await?;
        Ok(response.error_for_status()?.json().await?)
    }

    /// Poll the session until `pred` holds or `timeout` elapses
    pub async fn wait_for_session(
        &self,
        timeout: Duration,
        pred: impl Fn(&SessionResponse) -> bool,
    ) -> anyhow::Result<SessionResponse> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let session = self.session().await?;
            if pred(&session) {
                return Ok(session);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("session stuck in {} ({:?})", session.status, session.last_message);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub lifecycle: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsoleLine {
    pub id: u64,
    pub text: String,
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    pub status: String,
    pub install_progress: u8,
    pub install_phase: Option<String>,
    pub package_manager: Option<String>,
    pub framework: Option<String>,
    pub dev_command: Option<String>,
    pub preview_port: Option<u16>,
    pub preview_url: Option<String>,
    pub last_message: Option<String>,
    pub error: Option<String>,
    pub console: Vec<ConsoleLine>,
}

#[derive(Debug, Deserialize)]
pub struct ConsoleResponse {
    pub lines: Vec<ConsoleLine>,
    pub last_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub default_port: u16,
    pub file_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct TemplateDetection {
    pub template_id: Option<String>,
    pub confidence: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct LaunchRequest {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
}
