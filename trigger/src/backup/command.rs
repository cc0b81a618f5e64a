//! Backup command line

use std::path::{Path, PathBuf};

/// Default location of the idevicebackup2 executable
pub const DEFAULT_BACKUP_BIN: &str = "/usr/local/bin/idevicebackup2";

/// Fixed invocation of the external backup tool.
///
/// Every argument comes from configuration; nothing from an inbound request
/// ever reaches the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCommand {
    program: PathBuf,
    backup_path: PathBuf,
    device_uuid: String,
}

impl BackupCommand {
    pub fn new(
        program: impl Into<PathBuf>,
        backup_path: impl Into<PathBuf>,
        device_uuid: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            backup_path: backup_path.into(),
            device_uuid: device_uuid.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments after the program: `backup <dest> -n -u <uuid>`
    pub fn args(&self) -> Vec<String> {
        vec![
            "backup".to_string(),
            self.backup_path.to_string_lossy().to_string(),
            "-n".to_string(),
            "-u".to_string(),
            self.device_uuid.clone(),
        ]
    }

    /// Program and arguments as one printable line, for the run log
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().to_string()];
        parts.extend(self.args());
        parts.join(" ")
    }
}
