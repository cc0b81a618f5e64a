//! Guarded backup run
//!
//! [`BackupRunner::run_backup`] is the one operation this service exists for.
//! A single slot is held from the guard check until the run is done, so two
//! requests can never launch overlapping backups against the same device.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use crate::backup::command::BackupCommand;
use crate::backup::fsm::{RunEvent, RunFsm};
use crate::backup::guard::BackupGuard;
use crate::backup::process::{BackupProcess, ProcessEvent};
use crate::backup::run_log::RunLog;
use crate::clock::{iso_date, Clock};
use crate::errors::ServiceError;
use crate::http::client::HttpClient;
use crate::http::states::StateUpdate;

/// How long to keep reading output after the backup process has exited
const TRAILING_OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// What to report to the caller when the backup succeeded but the status
/// API could not be updated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotifyFailurePolicy {
    /// Log the failure and still report the backup as created
    #[default]
    Ignore,

    /// Fail the request
    Fail,
}

impl FromStr for NotifyFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(NotifyFailurePolicy::Ignore),
            "fail" => Ok(NotifyFailurePolicy::Fail),
            _ => Err(format!("Invalid notify failure policy: {}", s)),
        }
    }
}

/// Runner options
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Directory receiving one log file per run
    pub log_dir: PathBuf,

    /// Status entity receiving the backup date
    pub entity_id: String,

    /// Kill the backup after this long
    pub timeout: Option<Duration>,

    /// Outcome when the status update fails
    pub notify_failure: NotifyFailurePolicy,
}

/// Result of a successful invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A backup for the date already existed, nothing was run
    Skipped(NaiveDate),

    /// The backup ran and succeeded
    Created(NaiveDate),
}

impl BackupOutcome {
    pub fn date(&self) -> NaiveDate {
        match self {
            BackupOutcome::Skipped(date) | BackupOutcome::Created(date) => *date,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            BackupOutcome::Skipped(_) => "Backup for today exists",
            BackupOutcome::Created(_) => "Backup created",
        }
    }
}

/// Snapshot of the run slot
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStatus {
    pub in_progress: bool,
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
}

struct ActiveRun {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Clears the active run when the invocation ends, including when the
/// request future is dropped mid-run.
struct ActiveRunGuard<'a> {
    active: &'a Mutex<Option<ActiveRun>>,
}

impl Drop for ActiveRunGuard<'_> {
    fn drop(&mut self) {
        lock(self.active).take();
    }
}

fn lock(active: &Mutex<Option<ActiveRun>>) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum RunFailure {
    Launch(std::io::Error),
    Wait(std::io::Error),
    Exit(ExitStatus),
    Cancelled,
    TimedOut(Duration),
}

impl RunFailure {
    fn describe(&self) -> String {
        match self {
            RunFailure::Launch(e) => format!("Unable to start backup command: {}", e),
            RunFailure::Wait(e) => format!("Lost track of backup command: {}", e),
            RunFailure::Exit(status) => format!("Backup failed with {}", status),
            RunFailure::Cancelled => "Backup cancelled".to_string(),
            RunFailure::TimedOut(after) => format!("Backup timed out after {:?}", after),
        }
    }

    fn into_error(self, log_path: PathBuf) -> ServiceError {
        match self {
            RunFailure::Launch(e) => ServiceError::LaunchFailed {
                reason: e.to_string(),
                log_path,
            },
            RunFailure::Wait(e) => ServiceError::BackupFailed {
                status: e.to_string(),
                log_path,
            },
            RunFailure::Exit(status) => ServiceError::BackupFailed {
                status: status.to_string(),
                log_path,
            },
            RunFailure::Cancelled => ServiceError::Cancelled { log_path },
            RunFailure::TimedOut(after) => ServiceError::TimedOut {
                secs: after.as_secs(),
                log_path,
            },
        }
    }
}

/// Runs the backup command at most once per day and reports the result
pub struct BackupRunner {
    command: BackupCommand,
    guard: Arc<dyn BackupGuard>,
    http_client: Arc<HttpClient>,
    clock: Arc<dyn Clock>,
    options: RunnerOptions,
    slot: tokio::sync::Mutex<()>,
    active: Mutex<Option<ActiveRun>>,
    closed: AtomicBool,
}

impl BackupRunner {
    pub fn new(
        command: BackupCommand,
        guard: Arc<dyn BackupGuard>,
        http_client: Arc<HttpClient>,
        clock: Arc<dyn Clock>,
        options: RunnerOptions,
    ) -> Self {
        Self {
            command,
            guard,
            http_client,
            clock,
            options,
            slot: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Current state of the run slot
    pub fn status(&self) -> RunnerStatus {
        match lock(&self.active).as_ref() {
            Some(run) => RunnerStatus {
                in_progress: true,
                run_id: Some(run.run_id),
                started_at: Some(run.started_at),
            },
            None => RunnerStatus {
                in_progress: false,
                run_id: None,
                started_at: None,
            },
        }
    }

    /// Cancel the active run. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        match lock(&self.active).as_ref() {
            Some(run) => {
                info!("Cancelling backup run {}", run.run_id);
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Refuse new runs and cancel the active one, if any.
    ///
    /// Returns true when a run was cancelled.
    pub fn close(&self) -> bool {
        let active = lock(&self.active);
        self.closed.store(true, Ordering::SeqCst);
        match active.as_ref() {
            Some(run) => {
                info!("Cancelling backup run {} for shutdown", run.run_id);
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Run the backup unless one already completed today.
    ///
    /// Rejects immediately with [`ServiceError::InProgress`] while another
    /// invocation holds the slot.
    pub async fn run_backup(&self) -> Result<BackupOutcome, ServiceError> {
        let _slot = self.slot.try_lock().map_err(|_| ServiceError::InProgress)?;

        let run_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            let mut active = lock(&self.active);
            if self.closed.load(Ordering::SeqCst) {
                return Err(ServiceError::ShuttingDown);
            }
            *active = Some(ActiveRun {
                run_id,
                started_at: self.clock.now(),
                cancel: cancel.clone(),
            });
        }
        let _active = ActiveRunGuard {
            active: &self.active,
        };

        self.run_in_slot(run_id, cancel)
            .instrument(tracing::info_span!("backup", %run_id))
            .await
    }

    async fn run_in_slot(
        &self,
        run_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<BackupOutcome, ServiceError> {
        let today = self.clock.today();
        let mut fsm = RunFsm::new();

        info!("Starting Backup procedure");
        advance(&mut fsm, RunEvent::CheckGuard);

        if self.guard.backed_up_on(today).await {
            advance(&mut fsm, RunEvent::AlreadyBackedUp);
            info!("Backup for today exists ({} guard)", self.guard.name());
            advance(&mut fsm, RunEvent::Finish);
            return Ok(BackupOutcome::Skipped(today));
        }

        advance(&mut fsm, RunEvent::Launch);
        let mut log = match RunLog::open(&self.options.log_dir, self.clock.as_ref()).await {
            Ok(log) => log,
            Err(e) => {
                error!("Unable to open run log in {}: {}", self.options.log_dir.display(), e);
                advance(&mut fsm, RunEvent::Fail(e.to_string()));
                advance(&mut fsm, RunEvent::Finish);
                return Err(e);
            }
        };
        log.info(&format!("Run {} started", run_id)).await;
        log.info("No current backup exists, trying to run backup now").await;
        log.info(&format!("Running: {}", self.command.display())).await;

        if let Err(failure) = self.execute(&mut log, &cancel).await {
            let reason = failure.describe();
            log.error(&reason).await;
            advance(&mut fsm, RunEvent::Fail(reason));
            advance(&mut fsm, RunEvent::Finish);
            return Err(failure.into_error(log.path().to_path_buf()));
        }

        advance(&mut fsm, RunEvent::Exited);
        log.info("Backup completed").await;

        if let Err(e) = self.guard.record(today).await {
            log.error(&format!("Failed to record backup date: {}", e)).await;
        }

        advance(&mut fsm, RunEvent::Notify);
        log.info("Updating state in Home-Assistant").await;
        let update = StateUpdate {
            state: iso_date(today),
        };
        let notified = self
            .http_client
            .set_state(&self.options.entity_id, &update)
            .await;
        advance(&mut fsm, RunEvent::Finish);

        match notified {
            Ok(()) => {
                log.info("Home-Assistant state updated").await;
                Ok(BackupOutcome::Created(today))
            }
            Err(e) => {
                let reason = format!("Failed to update Home-Assistant state: {}", e);
                log.error(&reason).await;
                match self.options.notify_failure {
                    NotifyFailurePolicy::Ignore => Ok(BackupOutcome::Created(today)),
                    NotifyFailurePolicy::Fail => Err(ServiceError::NotifyFailed {
                        reason: e.to_string(),
                        log_path: log.path().to_path_buf(),
                    }),
                }
            }
        }
    }

    async fn execute(
        &self,
        log: &mut RunLog<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), RunFailure> {
        let mut process = BackupProcess::spawn(&self.command).map_err(RunFailure::Launch)?;

        let deadline = deadline(self.options.timeout);
        tokio::pin!(deadline);

        let status = loop {
            tokio::select! {
                event = process.next_event() => match event {
                    ProcessEvent::Line(line) => log.output(&line).await,
                    ProcessEvent::Exited(status) => break status.map_err(RunFailure::Wait)?,
                },
                _ = cancel.cancelled() => {
                    process.kill().await;
                    return Err(RunFailure::Cancelled);
                }
                _ = &mut deadline => {
                    process.kill().await;
                    return Err(self.timed_out());
                }
            }
        };

        // Output written just before exit may still be in flight
        let until = Instant::now() + TRAILING_OUTPUT_GRACE;
        while let Some(line) = process.next_trailing_line(until).await {
            log.output(&line).await;
        }

        if status.success() {
            Ok(())
        } else {
            Err(RunFailure::Exit(status))
        }
    }

    fn timed_out(&self) -> RunFailure {
        RunFailure::TimedOut(self.options.timeout.unwrap_or_default())
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => futures::future::pending::<()>().await,
    }
}

fn advance(fsm: &mut RunFsm, event: RunEvent) {
    match fsm.process(event) {
        Ok(state) => debug!("Backup run is now {:?}", state),
        Err(e) => error!("{}", e),
    }
}
