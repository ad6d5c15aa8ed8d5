//! Template and command catalog handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::domain::package::{PackageManagerKind, PackageManifest};
use crate::domain::types::DevCommandSpec;
use crate::service::inference::{infer_dev_command, CommandPrompt, ConfiguredScript};
use crate::service::template_detector::{detect_template as detect, TemplateDetection, TemplateSignals};
use crate::service::templates::TemplateSummary;
use crate::AppState;

/// Command inference request
#[derive(Debug, Deserialize)]
pub struct InferRequest {
    pub package_json: Option<PackageManifest>,
    #[serde(default)]
    pub package_manager: PackageManagerKind,
}

#[derive(Debug, Serialize)]
pub struct InferResponse {
    pub command: Option<DevCommandSpec>,
}

/// Bundled starter templates
pub async fn list_templates(State(state): State<AppState>) -> Json<Vec<TemplateSummary>> {
    Json(state.orchestrator.templates().list())
}

/// Classify repository signals into a starter template
pub async fn detect_template(Json(signals): Json<TemplateSignals>) -> Json<TemplateDetection> {
    Json(detect(&signals))
}

/// Infer the dev command for a manifest
pub async fn infer_command(
    State(state): State<AppState>,
    Json(req): Json<InferRequest>,
) -> Json<InferResponse> {
    let fallback = state.config.fallback_script.clone().map(ConfiguredScript);
    let command = infer_dev_command(
        req.package_json.as_ref(),
        req.package_manager,
        fallback.as_ref().map(|p| p as &dyn CommandPrompt),
    );
    Json(InferResponse { command })
}
