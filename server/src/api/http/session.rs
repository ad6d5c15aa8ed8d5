//! Session HTTP handlers

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::domain::file_tree::TreeEntry;
use crate::domain::lifecycle::{ConsoleLine, LifecycleSnapshot};
use crate::domain::repository::RepositoryRef;
use crate::{AppState, Error, Result};

/// Console query parameters
#[derive(Debug, Deserialize)]
pub struct ConsoleQuery {
    /// Only lines with a greater id
    pub since: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ConsoleResponse {
    pub lines: Vec<ConsoleLine>,
    pub last_id: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct LaunchAccepted {
    pub repository: String,
    pub branch: String,
}

/// Current lifecycle record
pub async fn get_session(State(state): State<AppState>) -> Json<LifecycleSnapshot> {
    Json(state.orchestrator.snapshot())
}

/// Stream lifecycle snapshots as they change
pub async fn session_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.orchestrator.bridge().subscribe()).filter_map(|snapshot| async move {
        match Event::default().event("snapshot").json_data(&snapshot) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Failed to encode snapshot event: {}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Console lines, optionally after a known id
pub async fn get_console(
    State(state): State<AppState>,
    Query(query): Query<ConsoleQuery>,
) -> Json<ConsoleResponse> {
    let lines = state
        .orchestrator
        .bridge()
        .console_since(query.since.unwrap_or(0));
    let last_id = lines.last().map(|line| line.id).or(query.since);
    Json(ConsoleResponse { lines, last_id })
}

/// Projection of the mounted file tree
pub async fn get_tree(State(state): State<AppState>) -> Json<Vec<TreeEntry>> {
    Json(state.orchestrator.bridge().tree())
}

/// Start a launch in the background
pub async fn launch(
    State(state): State<AppState>,
    Json(repo): Json<RepositoryRef>,
) -> Result<(StatusCode, Json<LaunchAccepted>)> {
    if repo.owner.trim().is_empty() || repo.name.trim().is_empty() {
        return Err(Error::InvalidRequest(
            "owner and name are required".to_string(),
        ));
    }
    if repo.default_branch.trim().is_empty() {
        return Err(Error::InvalidRequest("default_branch is required".to_string()));
    }

    let accepted = LaunchAccepted {
        repository: repo.full_name(),
        branch: repo.branch().to_string(),
    };
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        let outcome = orchestrator.launch(repo).await;
        info!("Launch finished: {:?}", outcome);
    });

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Cancel a running install
pub async fn cancel_install(State(state): State<AppState>) -> Json<LifecycleSnapshot> {
    state.orchestrator.cancel_install().await;
    Json(state.orchestrator.snapshot())
}

/// Stop the running dev server
pub async fn stop_dev_server(State(state): State<AppState>) -> Json<LifecycleSnapshot> {
    state.orchestrator.stop_dev_server().await;
    Json(state.orchestrator.snapshot())
}
