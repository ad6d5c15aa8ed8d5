//! Integration tests for the Devshell Server
//!
//! These tests require a running server.
//! Run with: DEVSHELL_TEST_URL=http://127.0.0.1:8080 cargo test

use std::time::Duration;

use integration_tests::*;
use serde_json::{json, Value};

macro_rules! test_config {
    () => {
        match TestConfig::from_env() {
            Some(config) => config,
            None => {
                eprintln!("DEVSHELL_TEST_URL not set; skipping");
                return;
            }
        }
    };
}

// ============================================================================
// Health Tests
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let config = test_config!();

    let response = config
        .client
        .get(config.api_url("/health"))
        .send()
        .await
        .expect("Failed to send health request");

    assert!(
        response.status().is_success(),
        "Health check failed with status: {}",
        response.status()
    );

    let health: HealthResponse = response.json().await.expect("Failed to parse health response");
    assert_eq!(health.status, "ok");
    assert!(health.backend == "local" || health.backend == "docker");
    assert!(!health.version.is_empty());
    assert!(!health.lifecycle.is_empty());
}

#[tokio::test]
async fn test_health_check_response_time() {
    let config = test_config!();

    let start = std::time::Instant::now();
    let response = config
        .client
        .get(config.api_url("/health"))
        .send()
        .await
        .expect("Failed to send health request");

    let elapsed = start.elapsed();
    assert!(response.status().is_success());
    assert!(
        elapsed.as_millis() < 500,
        "Health check took too long: {:?}",
        elapsed
    );
}

// ============================================================================
// Catalog Tests
// ============================================================================

#[tokio::test]
async fn test_list_templates() {
    let config = test_config!();

    let templates: Vec<TemplateSummary> = config
        .client
        .get(config.api_url("/templates"))
        .send()
        .await
        .expect("Failed to list templates")
        .json()
        .await
        .expect("Failed to parse templates");

    let next = templates
        .iter()
        .find(|t| t.id == "nextjs-starter")
        .expect("baseline template missing");
    assert_eq!(next.default_port, 3000);
    assert!(next.file_count > 0);
    assert!(templates.iter().any(|t| t.id == "vite-react-starter" && t.default_port == 5173));
}

#[tokio::test]
async fn test_detect_template_priority() {
    let config = test_config!();

    let detection: TemplateDetection = config
        .client
        .post(config.api_url("/templates/detect"))
        .json(&json!({
            "package_json": {"dependencies": {"next": "14.2.0", "vite": "5.0.0"}}
        }))
        .send()
        .await
        .expect("Failed to detect template")
        .json()
        .await
        .expect("Failed to parse detection");

    assert_eq!(detection.template_id.as_deref(), Some("nextjs-starter"));
    assert_eq!(detection.confidence, "high");
}

#[tokio::test]
async fn test_detect_template_undetermined() {
    let config = test_config!();

    let detection: TemplateDetection = config
        .client
        .post(config.api_url("/templates/detect"))
        .json(&json!({"package_json": {}}))
        .send()
        .await
        .expect("Failed to detect template")
        .json()
        .await
        .expect("Failed to parse detection");

    assert_eq!(detection.template_id, None);
    assert_eq!(detection.confidence, "low");
    assert_eq!(
        detection.reason,
        "unable to determine a suitable template from repository metadata"
    );
}

#[tokio::test]
async fn test_infer_command() {
    let config = test_config!();

    let body: Value = config
        .client
        .post(config.api_url("/commands/infer"))
        .json(&json!({
            "package_json": {"scripts": {"dev": "next dev"}, "dependencies": {"next": "14"}},
            "package_manager": "pnpm"
        }))
        .send()
        .await
        .expect("Failed to infer command")
        .json()
        .await
        .expect("Failed to parse inference");

    assert_eq!(body["command"]["framework"], "next");
    assert_eq!(body["command"]["display_label"], "pnpm dev");
    assert_eq!(body["command"]["port"], 3000);
}

// ============================================================================
// Session Tests
// ============================================================================

#[tokio::test]
async fn test_session_snapshot() {
    let config = test_config!();

    let session = config.session().await.expect("Failed to read session");
    let known = [
        "idle",
        "initializing",
        "installing-dependencies",
        "starting-dev-server",
        "ready",
        "error",
    ];
    assert!(known.contains(&session.status.as_str()), "unknown status {}", session.status);
    assert!(session.install_progress <= 100);
}

#[tokio::test]
async fn test_console_since_filters() {
    let config = test_config!();

    let console: ConsoleResponse = config
        .client
        .get(config.api_url("/session/console?since=18446744073709551615"))
        .send()
        .await
        .expect("Failed to read console")
        .json()
        .await
        .expect("Failed to parse console");

    assert!(console.lines.is_empty());
    assert_eq!(console.last_id, Some(u64::MAX));
}

#[tokio::test]
async fn test_session_events_stream() {
    let config = test_config!();

    let mut response = config
        .client
        .get(config.api_url("/session/events"))
        .send()
        .await
        .expect("Failed to open event stream");
    assert!(response.status().is_success());

    let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
        .await
        .expect("No event within 5s")
        .expect("Event stream failed")
        .expect("Event stream closed");
    let text = String::from_utf8_lossy(&chunk);
    assert!(text.contains("event: snapshot"), "unexpected frame: {}", text);
}

#[tokio::test]
async fn test_launch_requires_owner() {
    let config = test_config!();

    let response = config
        .client
        .post(config.api_url("/session/launch"))
        .json(&LaunchRequest {
            name: "site".to_string(),
            default_branch: "main".to_string(),
            ..Default::default()
        })
        .send()
        .await
        .expect("Failed to send launch");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 1001);
}

/// Launches an unreachable repository and expects the baseline template to
/// come up. Needs npm in the sandbox and network access for the install.
#[tokio::test]
#[ignore]
async fn test_launch_falls_back_to_template() {
    let config = test_config!();

    let response = config
        .client
        .post(config.api_url("/session/launch"))
        .json(&LaunchRequest {
            owner: "devshell-missing-owner".to_string(),
            name: "definitely-not-a-repo".to_string(),
            default_branch: "main".to_string(),
            ..Default::default()
        })
        .send()
        .await
        .expect("Failed to send launch");
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let session = config
        .wait_for_session(Duration::from_secs(600), |s| {
            s.status == "ready" || s.status == "error"
        })
        .await
        .expect("Launch did not settle");

    assert_eq!(session.status, "ready", "launch failed: {:?}", session.error);
    assert_eq!(session.preview_port, Some(3000));
    assert!(session
        .console
        .iter()
        .any(|l| l.level == "warn" && l.text.contains("Repository sync failed")));

    let stopped: SessionResponse = config
        .client
        .post(config.api_url("/session/dev-server/stop"))
        .send()
        .await
        .expect("Failed to stop dev server")
        .json()
        .await
        .expect("Failed to parse session");
    assert_eq!(stopped.status, "idle");
    assert_eq!(stopped.preview_url, None);
}
