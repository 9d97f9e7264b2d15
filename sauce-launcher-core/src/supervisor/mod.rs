//! Runs the tunnel binary and reports when it is ready.
//!
//! [`run`] spawns the binary and hands the child to a monitor task. The
//! monitor owns the process for its whole life: it reads stdout, polls the
//! readiness file, applies stop requests and publishes the exit status.
//! The caller gets exactly one outcome: a [`TunnelHandle`] once the
//! readiness file appears, or the error that ended the start.

pub mod args;
pub mod events;
pub mod handle;
pub mod readiness;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{Credentials, StatusLog, TunnelOptions};
use crate::error::LaunchError;
use crate::lifecycle::LifecycleGuard;

use self::events::{classify_line, OutputEvent, TunnelFailure};
use self::handle::ControlMessage;
use self::readiness::{ReadinessWatch, ReadyFile};

pub(crate) use self::handle::TunnelControl;
pub use self::handle::{TunnelExit, TunnelHandle};

/// Output left in the pipe after exit is read for at most this long.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

static NEXT_TUNNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Where the binary lives and how the supervisor paces itself.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub binary: PathBuf,
    pub readyfile: PathBuf,
    pub ready_poll: Duration,
    /// Grace period between SIGTERM and SIGKILL when stopping.
    pub close_timeout: Option<Duration>,
}

/// Starts the tunnel and waits until it is ready or has failed.
pub async fn run(
    options: &TunnelOptions,
    config: &SupervisorConfig,
    guard: &Arc<LifecycleGuard>,
) -> Result<TunnelHandle, LaunchError> {
    options.validate()?;
    let credentials = options.credentials()?;
    guard.ensure_idle().await?;

    launch(options, &credentials, config, guard).await
}

/// [`run`] for options that were already validated and resolved.
pub(crate) async fn launch(
    options: &TunnelOptions,
    credentials: &Credentials,
    config: &SupervisorConfig,
    guard: &Arc<LifecycleGuard>,
) -> Result<TunnelHandle, LaunchError> {
    let log = options.status_log();
    log.line("Opening local tunnel using Sauce Connect");

    let ready = ReadyFile::new(&config.readyfile);
    if ready.clear_stale().await? {
        debug!("Removed stale readiness file {}", ready.path().display());
    }

    let args = args::build_args(options, credentials, ready.path());
    log.line(&format!("Starting sc with args: {}", args::display_args(&args)));

    let (outcome_tx, outcome_rx) = oneshot::channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = watch::channel(None);
    let id = NEXT_TUNNEL_ID.fetch_add(1, Ordering::Relaxed);

    let (mut child, control) = guard
        .track_with(|| {
            let child = Command::new(&config.binary)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| LaunchError::Spawn {
                    path: config.binary.clone(),
                    source,
                })?;
            let control = TunnelControl::new(id, child.id(), command_tx, exit_rx);
            Ok((child, control))
        })
        .await?;

    info!(tunnel = id, pid = ?child.id(), "Spawned {}", config.binary.display());

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = OutputLines::new(stderr);
            while let Some(line) = lines.next_line().await {
                debug!(target: "sauce_connect", "stderr: {}", line.trim_end());
            }
        });
    }

    let monitor = Monitor {
        id,
        child,
        ready: ReadinessWatch::new(ready),
        ready_poll: config.ready_poll,
        close_timeout: config.close_timeout,
        log,
        verbose: options.verbose,
        guard: Arc::clone(guard),
        commands: command_rx,
        outcome: Some(outcome_tx),
        exit: exit_tx,
        failure: None,
    };
    tokio::spawn(monitor.run());

    match outcome_rx.await {
        Ok(Ok(())) => Ok(TunnelHandle::new(control, config.close_timeout)),
        Ok(Err(e)) => Err(e),
        // The monitor always answers before it finishes.
        Err(_) => Err(LaunchError::Start {
            code: None,
            signal: None,
        }),
    }
}

// ============================================================================
// Monitor
// ============================================================================

struct Monitor {
    id: u64,
    child: Child,
    ready: ReadinessWatch,
    ready_poll: Duration,
    close_timeout: Option<Duration>,
    log: StatusLog,
    verbose: bool,
    guard: Arc<LifecycleGuard>,
    commands: mpsc::UnboundedReceiver<ControlMessage>,
    /// Pending start result. `None` once answered.
    outcome: Option<oneshot::Sender<Result<(), LaunchError>>>,
    exit: watch::Sender<Option<TunnelExit>>,
    /// Last error line, reported when the process exits.
    failure: Option<TunnelFailure>,
}

impl Monitor {
    async fn run(mut self) {
        let mut lines = self.child.stdout.take().map(OutputLines::new);
        let mut stdout_open = lines.is_some();

        let mut ticker = tokio::time::interval(self.ready_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let status = loop {
            tokio::select! {
                line = next_line(&mut lines), if stdout_open => match line {
                    Some(line) => self.handle_line(&line),
                    None => stdout_open = false,
                },
                status = self.child.wait() => break status,
                Some(message) = self.commands.recv() => self.apply(message),
                _ = ticker.tick(), if self.outcome.is_some() => self.check_ready().await,
                _ = abandoned(&mut self.outcome), if self.outcome.is_some() => {
                    warn!(tunnel = self.id, "Start was abandoned, stopping Sauce Connect");
                    self.outcome = None;
                    self.terminate();
                }
            }
        };

        if stdout_open {
            let drain = async {
                while let Some(line) = next_line(&mut lines).await {
                    self.handle_line(&line);
                }
            };
            if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
                debug!(tunnel = self.id, "Stopped reading output after exit");
            }
        }

        let exit = match status {
            Ok(status) => TunnelExit::from_status(&status),
            Err(e) => {
                warn!(tunnel = self.id, error = %e, "Failed to wait for Sauce Connect");
                TunnelExit::default()
            }
        };
        debug!(tunnel = self.id, code = ?exit.code, signal = ?exit.signal, "Sauce Connect exited");

        self.guard.release(self.id).await;

        match self.outcome.take() {
            Some(outcome) => {
                let err = match self.failure.take() {
                    Some(failure) => LaunchError::from(failure),
                    None => LaunchError::Start {
                        code: exit.code,
                        signal: exit.signal.clone(),
                    },
                };
                self.log.line(&err.to_string());
                let _ = outcome.send(Err(err));
            }
            None => {
                if let Some(failure) = &self.failure {
                    warn!(tunnel = self.id, "Sauce Connect reported: {}", failure);
                }
                self.log.line("Closing Sauce Connect Tunnel");
            }
        }

        self.exit.send_replace(Some(exit));
    }

    fn handle_line(&mut self, raw: &str) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }

        if self.verbose {
            info!(target: "sauce_connect", "{}", line);
        } else {
            debug!(target: "sauce_connect", "{}", line);
        }

        match classify_line(line) {
            Some(OutputEvent::Connecting) => self.log.line("Creating tunnel with Sauce Labs"),
            Some(OutputEvent::Outdated) => warn!("This version of Sauce Connect is outdated"),
            Some(OutputEvent::ErrorDetected(failure)) => {
                if matches!(failure, TunnelFailure::InvalidCredentials(_)) {
                    self.log.line("Invalid Sauce Connect Credentials");
                }
                self.failure = Some(failure);
            }
            Some(OutputEvent::ShuttingDown) => {
                debug!(tunnel = self.id, "Sauce Connect is shutting down")
            }
            None => {}
        }
    }

    async fn check_ready(&mut self) {
        match self.ready.check().await {
            Ok(false) => {}
            Ok(true) => {
                self.log.line("Detected sc ready");
                self.log.line("Testing tunnel ready");
                self.guard.install_exit_hook(self.close_timeout);

                if let Some(outcome) = self.outcome.take() {
                    if outcome.send(Ok(())).is_err() {
                        warn!(tunnel = self.id, "Start was abandoned, stopping Sauce Connect");
                        self.terminate();
                    }
                }
            }
            Err(err) => {
                warn!(tunnel = self.id, error = %err, "Stopping Sauce Connect");
                if let Some(outcome) = self.outcome.take() {
                    let _ = outcome.send(Err(err));
                }
                self.terminate();
            }
        }
    }

    fn apply(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Terminate => self.terminate(),
            ControlMessage::Kill => self.kill(),
        }
    }

    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                    Ok(()) => debug!(tunnel = self.id, pid, "Sent SIGTERM"),
                    Err(e) => warn!(tunnel = self.id, pid, error = %e, "Failed to send SIGTERM"),
                }
                return;
            }
        }

        self.kill();
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(tunnel = self.id, error = %e, "Kill failed");
        }
    }
}

async fn next_line(lines: &mut Option<OutputLines<ChildStdout>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => None,
    }
}

/// Resolves once the caller of [`run`] stops waiting for the outcome.
async fn abandoned(outcome: &mut Option<oneshot::Sender<Result<(), LaunchError>>>) {
    match outcome {
        Some(outcome) => outcome.closed().await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Output Lines
// ============================================================================

/// Splits process output into lines, replacing invalid UTF-8.
///
/// Partial lines survive a cancelled read, so `next_line` can sit in a
/// `select!`.
struct OutputLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// `None` at end of stream or on a read error.
    async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) if self.buf.is_empty() => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buf).into_owned();
                self.buf.clear();
                Some(line)
            }
            Err(e) => {
                debug!(error = %e, "Stopped reading Sauce Connect output");
                None
            }
        }
    }
}
