//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::backup::runner::{BackupOutcome, RunnerStatus};
use crate::clock::iso_date;
use crate::errors::ServiceError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Plain message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    MessageResponse::new("Healthcheck")
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Backup response
#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub date: String,
    pub message: String,
}

impl From<BackupOutcome> for BackupResponse {
    fn from(outcome: BackupOutcome) -> Self {
        Self {
            date: iso_date(outcome.date()),
            message: outcome.message().to_string(),
        }
    }
}

/// Run the backup unless today's already exists
pub async fn backup_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.runner.run_backup().await {
        Ok(outcome) => Json(BackupResponse::from(outcome)).into_response(),
        Err(e) => backup_error_response(e),
    }
}

fn backup_error_response(e: ServiceError) -> Response {
    if let ServiceError::InProgress = e {
        return (StatusCode::CONFLICT, MessageResponse::new(e.to_string())).into_response();
    }

    error!("Backup request failed: {}", e);
    let body = match e.log_path() {
        Some(path) => format!("Backup failed, see log file '{}'", path.display()),
        None => format!("Backup failed: {}", e),
    };
    (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
}

/// Report whether a backup is running
pub async fn backup_status_handler(State(state): State<Arc<ServerState>>) -> Json<RunnerStatus> {
    Json(state.runner.status())
}

/// Cancel the running backup
pub async fn cancel_handler(State(state): State<Arc<ServerState>>) -> Response {
    if state.runner.cancel() {
        (
            StatusCode::ACCEPTED,
            MessageResponse::new("Backup cancellation requested"),
        )
            .into_response()
    } else {
        (StatusCode::NOT_FOUND, MessageResponse::new("No backup in progress")).into_response()
    }
}
