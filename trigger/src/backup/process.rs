//! Backup subprocess with a merged, incrementally drained output stream
//!
//! stdout and stderr each get a pump task that reads the pipe line by line
//! and forwards every line into one channel as soon as it is read. The
//! consumer sees the two streams interleaved in arrival order, and each
//! stream keeps its own line order.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backup::command::BackupCommand;

const LINE_BUFFER: usize = 256;

/// Which pipe a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputSource::Stdout => f.write_str("stdout"),
            OutputSource::Stderr => f.write_str("stderr"),
        }
    }
}

/// A single line of subprocess output, without its terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub source: OutputSource,
    pub text: String,
}

/// What the process produced next
#[derive(Debug)]
pub enum ProcessEvent {
    Line(OutputLine),
    Exited(std::io::Result<ExitStatus>),
}

/// A running backup subprocess
pub struct BackupProcess {
    child: Child,
    lines: mpsc::Receiver<OutputLine>,
    lines_open: bool,
    pumps: Vec<JoinHandle<()>>,
}

impl BackupProcess {
    /// Spawn the command with both output pipes captured.
    ///
    /// The child is killed if this handle is dropped before it exits.
    pub fn spawn(command: &BackupCommand) -> std::io::Result<Self> {
        let mut child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        debug!("Spawned backup process (pid {:?})", child.id());

        let (tx, lines) = mpsc::channel(LINE_BUFFER);
        let mut pumps = Vec::with_capacity(2);

        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, OutputSource::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, OutputSource::Stderr, tx)));
        }

        Ok(Self {
            child,
            lines,
            lines_open: true,
            pumps,
        })
    }

    /// Next output line, or the exit status once the process is gone.
    ///
    /// Exit is reported as soon as the process ends, even if something it
    /// left behind still holds the pipes open. Lines still in flight at that
    /// point are picked up with [`BackupProcess::next_trailing_line`].
    pub async fn next_event(&mut self) -> ProcessEvent {
        if !self.lines_open {
            return ProcessEvent::Exited(self.child.wait().await);
        }

        tokio::select! {
            line = self.lines.recv() => match line {
                Some(line) => ProcessEvent::Line(line),
                None => {
                    self.lines_open = false;
                    ProcessEvent::Exited(self.child.wait().await)
                }
            },
            status = self.child.wait() => ProcessEvent::Exited(status),
        }
    }

    /// Output still buffered after exit. Returns `None` once both pipes are
    /// closed or `until` has passed.
    pub async fn next_trailing_line(&mut self, until: Instant) -> Option<OutputLine> {
        if !self.lines_open {
            return None;
        }

        match tokio::time::timeout_at(until, self.lines.recv()).await {
            Ok(Some(line)) => Some(line),
            Ok(None) => {
                self.lines_open = false;
                None
            }
            Err(_) => {
                debug!("Output pipes still open after exit, no longer reading them");
                self.stop_pumps();
                None
            }
        }
    }

    /// Kill the process and reap it
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill backup process: {}", e);
        }
        self.stop_pumps();
    }

    fn stop_pumps(&mut self) {
        self.lines_open = false;
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

impl Drop for BackupProcess {
    fn drop(&mut self) {
        self.stop_pumps();
    }
}

async fn pump<R>(reader: R, source: OutputSource, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(OutputLine { source, text }).await.is_err() {
                    // Receiver gone, nobody is listening anymore
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read backup {}: {}", source, e);
                break;
            }
        }
    }
}
