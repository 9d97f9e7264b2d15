//! Tracks the tunnel process this host launched.
//!
//! At most one tunnel is tracked at a time. Once a tunnel becomes ready the
//! guard registers a shutdown hook (once per guard) so a termination signal
//! stops the tunnel before the host exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::LaunchError;
use crate::signals::ShutdownHooks;
use crate::supervisor::{TunnelControl, TunnelExit};

pub struct LifecycleGuard {
    current: Mutex<Option<TunnelControl>>,
    hook_installed: AtomicBool,
}

impl Default for LifecycleGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            hook_installed: AtomicBool::new(false),
        }
    }

    /// The guard used by the free [`crate::start`], [`crate::kill`] and
    /// [`crate::clean`] functions.
    pub fn global() -> Arc<LifecycleGuard> {
        static GLOBAL: OnceLock<Arc<LifecycleGuard>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(LifecycleGuard::new())))
    }

    /// Runs `spawn` while holding the slot and records the control it
    /// returns. Fails without calling `spawn` if a live tunnel is tracked.
    pub(crate) async fn track_with<T, F>(
        &self,
        spawn: F,
    ) -> Result<(T, TunnelControl), LaunchError>
    where
        F: FnOnce() -> Result<(T, TunnelControl), LaunchError>,
    {
        let mut current = self.current.lock().await;
        check_idle(current.as_ref())?;

        let (value, control) = spawn()?;
        debug!(tunnel = control.id(), pid = ?control.pid(), "Tracking Sauce Connect");
        *current = Some(control.clone());
        Ok((value, control))
    }

    /// Fails if a live tunnel is tracked.
    pub(crate) async fn ensure_idle(&self) -> Result<(), LaunchError> {
        check_idle(self.current.lock().await.as_ref())
    }

    /// Forgets tunnel `id` if it is still the tracked one.
    pub(crate) async fn release(&self, id: u64) {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|c| c.id() == id) {
            debug!(tunnel = id, "Released Sauce Connect");
            *current = None;
        }
    }

    /// Id of the tracked tunnel, if any.
    pub async fn tracked(&self) -> Option<u64> {
        self.current.lock().await.as_ref().map(TunnelControl::id)
    }

    /// Stops the tracked tunnel and waits for it to exit. Returns `None` if
    /// nothing was tracked.
    pub async fn kill_processes(&self, grace: Option<Duration>) -> Option<TunnelExit> {
        // The tunnel's own task takes the lock to release itself, so it
        // must not be held while waiting.
        let control = self.current.lock().await.clone()?;

        let exit = control.stop(grace).await;
        self.release(control.id()).await;
        Some(exit)
    }

    /// Registers the shutdown hook on the process-wide hooks and starts
    /// listening for termination signals. Returns false if this guard had
    /// already registered.
    pub fn install_exit_hook(self: &Arc<Self>, grace: Option<Duration>) -> bool {
        let hooks = ShutdownHooks::global();
        let installed = self.install_exit_hook_in(hooks, grace);
        hooks.listen();
        installed
    }

    pub(crate) fn install_exit_hook_in(
        self: &Arc<Self>,
        hooks: &ShutdownHooks,
        grace: Option<Duration>,
    ) -> bool {
        if self.hook_installed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let guard = Arc::downgrade(self);
        hooks.register("stop tracked tunnel", move || {
            let guard = guard.clone();
            async move {
                if let Some(guard) = guard.upgrade() {
                    if let Some(exit) = guard.kill_processes(grace).await {
                        info!(code = ?exit.code, signal = ?exit.signal, "Sauce Connect stopped");
                    }
                }
            }
        });
        true
    }
}

fn check_idle(current: Option<&TunnelControl>) -> Result<(), LaunchError> {
    match current {
        Some(control) if control.exit_status().is_none() => {
            Err(LaunchError::AlreadyRunning(control.id()))
        }
        _ => Ok(()),
    }
}
