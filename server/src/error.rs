//! Error types for the devshell server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the devshell server
#[derive(Debug, Error)]
pub enum Error {
    // Environment errors (2000-2999)
    #[error("Sandbox environment unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("Sandbox host error: {0}")]
    HostError(String),

    #[error("Docker error: {0}")]
    DockerError(String),

    // Project errors (3000-3999)
    #[error("Repository sync failed: {0}")]
    SyncFailed(String),

    #[error("No template available for id: {0}")]
    TemplateNotFound(String),

    #[error("Cannot determine project structure: no package.json found")]
    MissingManifest,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // Process errors (4000-4999)
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Dependency installation failed with exit code {0}")]
    InstallFailed(i32),

    #[error(
        "Cannot determine dev server command: define a \"dev\" or \"start\" script in package.json"
    )]
    CommandNotInferred,

    #[error("Dev server exited unexpectedly with code {0}")]
    DevServerExited(i32),

    #[error("Dev server did not become ready within {0} seconds")]
    StartupTimeout(u64),

    // General errors (1000-1999)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code
    pub fn code(&self) -> u32 {
        match self {
            // Environment errors (2000-2999)
            Error::SandboxUnavailable(_) => 2001,
            Error::HostError(_) => 2002,
            Error::DockerError(_) => 2003,

            // Project errors (3000-3999)
            Error::SyncFailed(_) => 3001,
            Error::TemplateNotFound(_) => 3002,
            Error::MissingManifest => 3003,
            Error::InvalidPath(_) => 3004,

            // Process errors (4000-4999)
            Error::SpawnFailed(_) => 4001,
            Error::InstallFailed(_) => 4002,
            Error::CommandNotInferred => 4003,
            Error::DevServerExited(_) => 4004,
            Error::StartupTimeout(_) => 4005,

            // General errors (1000-1999)
            Error::InvalidRequest(_) => 1001,
            Error::Internal(_) => 1002,
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::TemplateNotFound(_) => StatusCode::NOT_FOUND,

            Error::InvalidRequest(_) | Error::InvalidPath(_) => StatusCode::BAD_REQUEST,

            Error::MissingManifest | Error::CommandNotInferred => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            Error::SyncFailed(_) => StatusCode::BAD_GATEWAY,

            Error::SandboxUnavailable(_) | Error::DockerError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            Error::StartupTimeout(_) => StatusCode::GATEWAY_TIMEOUT,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::DockerError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::SyncFailed(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidRequest(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(err.to_string())
    }
}
