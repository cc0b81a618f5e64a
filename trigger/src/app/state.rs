//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::{AppOptions, GuardMode};
use crate::backup::guard::{BackupGuard, MarkerFileGuard, StatusApiGuard, MARKER_FILE_NAME};
use crate::backup::runner::{BackupRunner, RunnerOptions};
use crate::clock::Clock;
use crate::errors::ServiceError;
use crate::filesys::dir::Dir;
use crate::http::client::HttpClient;

/// Main application state
pub struct AppState {
    /// Backup runner
    pub runner: Arc<BackupRunner>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions, clock: Arc<dyn Clock>) -> Result<Self, ServiceError> {
        info!("Initializing application state...");

        let http_client = Arc::new(HttpClient::new(
            &options.hass.base_url,
            options.hass.api_key.clone(),
        )?);

        let guard: Arc<dyn BackupGuard> = match &options.guard {
            GuardMode::StatusApi => Arc::new(StatusApiGuard::new(
                http_client.clone(),
                options.hass.entity_id.clone(),
            )),
            GuardMode::MarkerFile { state_dir } => {
                let state_dir = Dir::new(state_dir);
                state_dir.create().await?;
                Arc::new(MarkerFileGuard::new(state_dir.file(MARKER_FILE_NAME)))
            }
        };
        info!("Using {} guard", guard.name());

        let log_dir = Dir::new(&options.log_dir);
        log_dir.create().await?;

        let runner = Arc::new(BackupRunner::new(
            options.backup_command(),
            guard,
            http_client,
            clock,
            RunnerOptions {
                log_dir: log_dir.path().to_path_buf(),
                entity_id: options.hass.entity_id.clone(),
                timeout: options.backup_timeout,
                notify_failure: options.notify_failure,
            },
        ));

        Ok(Self { runner })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Shutting down application state...");
        if self.runner.close() {
            info!("Cancelled running backup");
        }
        Ok(())
    }
}
