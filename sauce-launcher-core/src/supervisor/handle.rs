//! Handles to a running tunnel process.

use std::process::ExitStatus;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Requests sent to the task that owns the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlMessage {
    /// SIGTERM on Unix, a hard kill elsewhere.
    Terminate,
    Kill,
}

/// How the tunnel process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelExit {
    pub code: Option<i32>,
    /// Name of the terminating signal, e.g. `SIGTERM`.
    pub signal: Option<String>,
}

impl TunnelExit {
    pub(crate) fn from_status(status: &ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal().map(signal_name)
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[cfg(unix)]
fn signal_name(signo: i32) -> String {
    nix::sys::signal::Signal::try_from(signo)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| signo.to_string())
}

// ============================================================================
// Tunnel Control
// ============================================================================

/// Cloneable control surface shared by the handle and the lifecycle guard.
#[derive(Clone)]
pub(crate) struct TunnelControl {
    id: u64,
    pid: Option<u32>,
    commands: mpsc::UnboundedSender<ControlMessage>,
    exit: watch::Receiver<Option<TunnelExit>>,
}

impl TunnelControl {
    pub(crate) fn new(
        id: u64,
        pid: Option<u32>,
        commands: mpsc::UnboundedSender<ControlMessage>,
        exit: watch::Receiver<Option<TunnelExit>>,
    ) -> Self {
        Self {
            id,
            pid,
            commands,
            exit,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub(crate) fn exit_status(&self) -> Option<TunnelExit> {
        self.exit.borrow().clone()
    }

    /// Returns false once the owning task is gone.
    pub(crate) fn request(&self, message: ControlMessage) -> bool {
        self.commands.send(message).is_ok()
    }

    /// Resolves once the process has exited.
    pub(crate) async fn closed(&self) -> TunnelExit {
        let mut exit = self.exit.clone();
        let seen = exit
            .wait_for(Option::is_some)
            .await
            .map(|value| (*value).clone())
            .ok()
            .flatten();
        // The sender is only dropped after publishing the exit.
        seen.or_else(|| exit.borrow().clone()).unwrap_or_default()
    }

    /// Asks the process to terminate and waits for it to exit. After `grace`
    /// the process is killed outright; `None` waits as long as it takes.
    pub(crate) async fn stop(&self, grace: Option<Duration>) -> TunnelExit {
        if let Some(exit) = self.exit_status() {
            return exit;
        }

        debug!(tunnel = self.id, "Stopping Sauce Connect");
        self.request(ControlMessage::Terminate);

        let Some(grace) = grace else {
            return self.closed().await;
        };

        match tokio::time::timeout(grace, self.closed()).await {
            Ok(exit) => exit,
            Err(_) => {
                warn!(
                    tunnel = self.id,
                    "Sauce Connect did not exit within {:?}, killing it", grace
                );
                self.request(ControlMessage::Kill);
                self.closed().await
            }
        }
    }
}

// ============================================================================
// Tunnel Handle
// ============================================================================

/// A ready tunnel.
///
/// Dropping the handle asks the tunnel to terminate without waiting for it;
/// call [`TunnelHandle::close`] to wait, or [`TunnelHandle::detach`] to leave
/// it running under the lifecycle guard.
#[must_use = "dropping a TunnelHandle stops the tunnel"]
pub struct TunnelHandle {
    control: TunnelControl,
    close_timeout: Option<Duration>,
    released: bool,
}

impl TunnelHandle {
    pub(crate) fn new(control: TunnelControl, close_timeout: Option<Duration>) -> Self {
        Self {
            control,
            close_timeout,
            released: false,
        }
    }

    /// Launcher-assigned tunnel number.
    pub fn id(&self) -> u64 {
        self.control.id()
    }

    pub fn pid(&self) -> Option<u32> {
        self.control.pid()
    }

    pub fn is_running(&self) -> bool {
        self.control.exit_status().is_none()
    }

    /// Waits for the tunnel to exit on its own.
    pub async fn wait(&self) -> TunnelExit {
        self.control.closed().await
    }

    /// Terminates the tunnel and resolves once the process has exited.
    pub async fn close(mut self) -> TunnelExit {
        self.released = true;
        self.control.stop(self.close_timeout).await
    }

    /// Gives up the handle without stopping the tunnel.
    pub fn detach(mut self) {
        self.released = true;
    }
}

impl std::fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("id", &self.id())
            .field("pid", &self.pid())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if !self.released && self.is_running() {
            debug!(tunnel = self.id(), "TunnelHandle dropped, terminating tunnel");
            self.control.request(ControlMessage::Terminate);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A control backed by a task that exits on the first request, counting
    /// the requests it saw.
    pub(crate) fn fake_control(id: u64) -> (TunnelControl, Arc<AtomicUsize>) {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let requests = Arc::new(AtomicUsize::new(0));

        let seen = requests.clone();
        tokio::spawn(async move {
            if let Some(message) = command_rx.recv().await {
                seen.fetch_add(1, Ordering::SeqCst);
                let signal = match message {
                    ControlMessage::Terminate => "SIGTERM",
                    ControlMessage::Kill => "SIGKILL",
                };
                let _ = exit_tx.send(Some(TunnelExit {
                    code: None,
                    signal: Some(signal.to_string()),
                }));
            }
        });

        (TunnelControl::new(id, Some(4242), command_tx, exit_rx), requests)
    }

    #[tokio::test]
    async fn test_close_waits_for_exit() {
        let (control, requests) = fake_control(1);
        let handle = TunnelHandle::new(control.clone(), None);
        assert!(handle.is_running());
        assert_eq!(handle.pid(), Some(4242));

        let exit = handle.close().await;
        assert_eq!(exit.signal.as_deref(), Some("SIGTERM"));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert!(control.exit_status().is_some());
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        // Ignores Terminate, exits on Kill.
        tokio::spawn(async move {
            while let Some(message) = command_rx.recv().await {
                if message == ControlMessage::Kill {
                    let _ = exit_tx.send(Some(TunnelExit {
                        code: None,
                        signal: Some("SIGKILL".into()),
                    }));
                    break;
                }
            }
        });

        let control = TunnelControl::new(7, None, command_tx, exit_rx);
        let exit = control.stop(Some(Duration::from_millis(50))).await;
        assert_eq!(exit.signal.as_deref(), Some("SIGKILL"));
    }

    #[tokio::test]
    async fn test_drop_requests_terminate() {
        let (control, requests) = fake_control(2);
        drop(TunnelHandle::new(control.clone(), None));

        let exit = control.closed().await;
        assert_eq!(exit.signal.as_deref(), Some("SIGTERM"));
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detach_leaves_tunnel_running() {
        let (control, requests) = fake_control(3);
        TunnelHandle::new(control.clone(), None).detach();

        tokio::task::yield_now().await;
        assert!(control.exit_status().is_none());
        assert_eq!(requests.load(Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(15), "SIGTERM");
        assert_eq!(signal_name(9), "SIGKILL");
    }
}
