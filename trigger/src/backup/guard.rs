//! Daily guard: "has a backup already completed today?"
//!
//! Two interchangeable strategies sit behind [`BackupGuard`]. Exactly one is
//! active per deployment. Both fail open: if the stored date cannot be read,
//! the guard reports no backup and the run goes ahead.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::clock::iso_date;
use crate::errors::ServiceError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;

/// Name of the marker file inside the state directory
pub const MARKER_FILE_NAME: &str = "latest-backup-date";

/// Source of truth for the date of the last successful backup
#[async_trait]
pub trait BackupGuard: Send + Sync {
    /// Stored date value, or `None` when it cannot be read
    async fn last_backup(&self) -> Option<String>;

    /// Record a successful backup on `date`
    async fn record(&self, date: NaiveDate) -> Result<(), ServiceError>;

    /// Strategy name for logs
    fn name(&self) -> &str;

    /// Whether a backup already completed on `today`
    async fn backed_up_on(&self, today: NaiveDate) -> bool {
        match self.last_backup().await {
            Some(value) => matches_date(&value, today),
            None => false,
        }
    }
}

/// Compare a stored value against a calendar date
pub fn matches_date(value: &str, date: NaiveDate) -> bool {
    value.trim() == iso_date(date)
}

/// Guard backed by a local marker file holding one ISO date
pub struct MarkerFileGuard {
    marker: File,
}

impl MarkerFileGuard {
    pub fn new(marker: File) -> Self {
        Self { marker }
    }
}

#[async_trait]
impl BackupGuard for MarkerFileGuard {
    async fn last_backup(&self) -> Option<String> {
        match self.marker.read_first_line().await {
            Ok(value) => Some(value),
            Err(ServiceError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No marker at {}", self.marker.path().display());
                None
            }
            Err(e) => {
                warn!("Unable to read marker {}: {}", self.marker.path().display(), e);
                None
            }
        }
    }

    async fn record(&self, date: NaiveDate) -> Result<(), ServiceError> {
        self.marker.write_atomic(iso_date(date).as_bytes()).await
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Guard backed by the state of a Home Assistant entity.
///
/// The same entity receives the success notification, so recording is a
/// no-op here.
pub struct StatusApiGuard {
    http_client: Arc<HttpClient>,
    entity_id: String,
}

impl StatusApiGuard {
    pub fn new(http_client: Arc<HttpClient>, entity_id: impl Into<String>) -> Self {
        Self {
            http_client,
            entity_id: entity_id.into(),
        }
    }
}

#[async_trait]
impl BackupGuard for StatusApiGuard {
    async fn last_backup(&self) -> Option<String> {
        match self.http_client.get_state(&self.entity_id).await {
            Ok(state) => Some(state.state),
            Err(e) => {
                warn!("Unable to fetch state of {}: {}", self.entity_id, e);
                None
            }
        }
    }

    async fn record(&self, _date: NaiveDate) -> Result<(), ServiceError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "api"
    }
}
