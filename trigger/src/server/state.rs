//! Server state

use std::sync::Arc;

use crate::backup::runner::BackupRunner;

/// Server state shared across handlers
pub struct ServerState {
    pub runner: Arc<BackupRunner>,
}

impl ServerState {
    pub fn new(runner: Arc<BackupRunner>) -> Self {
        Self { runner }
    }
}
