//! Per-run backup log
//!
//! Every backup run gets its own append-only text file. Each line is
//! timestamped and flushed as soon as it is written so the file can be
//! tailed while a long backup is still going.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use crate::backup::process::{OutputLine, OutputSource};
use crate::clock::Clock;
use crate::errors::ServiceError;

/// Severity written in front of each line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLevel {
    Info,
    Error,
    /// Subprocess stdout
    Output,
    /// Subprocess stderr
    Stderr,
}

impl fmt::Display for LineLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LineLevel::Info => "INFO",
            LineLevel::Error => "ERROR",
            LineLevel::Output => "OUTPUT",
            LineLevel::Stderr => "STDERR",
        };
        f.write_str(s)
    }
}

/// File name of the log for a run started at `started_at`
pub fn log_file_name(started_at: DateTime<Utc>) -> String {
    format!("backup_log_{}.log", started_at.format("%Y%m%d%H%M%S"))
}

fn format_line(at: DateTime<Utc>, level: LineLevel, text: &str) -> String {
    format!(
        "{} {} {}\n",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        level,
        text
    )
}

/// Append-only log sink for one backup run
pub struct RunLog<'a> {
    path: PathBuf,
    file: fs::File,
    clock: &'a dyn Clock,
}

impl<'a> RunLog<'a> {
    /// Open (or append to) the run log inside `dir`
    pub async fn open(dir: &Path, clock: &'a dyn Clock) -> Result<RunLog<'a>, ServiceError> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(log_file_name(clock.now()));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self { path, file, clock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lifecycle message
    pub async fn info(&mut self, text: &str) {
        info!("{}", text);
        self.write(LineLevel::Info, text).await;
    }

    pub async fn error(&mut self, text: &str) {
        error!("{}", text);
        self.write(LineLevel::Error, text).await;
    }

    /// One line of subprocess output, tagged with the pipe it came from
    pub async fn output(&mut self, line: &OutputLine) {
        info!(target: "ibackup_trigger::backup::output", source = %line.source, "{}", line.text);
        let level = match line.source {
            OutputSource::Stdout => LineLevel::Output,
            OutputSource::Stderr => LineLevel::Stderr,
        };
        self.write(level, &line.text).await;
    }

    async fn write(&mut self, level: LineLevel, text: &str) {
        let line = format_line(self.clock.now(), level, text);
        let result = async {
            self.file.write_all(line.as_bytes()).await?;
            self.file.flush().await
        }
        .await;

        if let Err(e) = result {
            error!("Failed to write run log {}: {}", self.path.display(), e);
        }
    }
}
