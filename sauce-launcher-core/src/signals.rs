//! Host shutdown handling.
//!
//! Work that must happen when the host process is asked to terminate is
//! registered as a hook. One listener task waits for SIGINT, SIGTERM or
//! SIGHUP (Ctrl-C on Windows), runs every registered hook in registration
//! order and then exits the process with `128 + signo`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::{debug, info, warn};

type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Hook = Arc<dyn Fn() -> HookFuture + Send + Sync>;

// ============================================================================
// Termination Signal
// ============================================================================

/// A termination request delivered to the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
    Hangup,
}

impl TerminationSignal {
    fn number(&self) -> i32 {
        match self {
            Self::Hangup => 1,
            Self::Interrupt => 2,
            Self::Terminate => 15,
        }
    }

    /// Conventional shell exit status for a process ended by this signal.
    pub fn exit_code(&self) -> i32 {
        128 + self.number()
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
            Self::Hangup => "SIGHUP",
        };
        write!(f, "{}", name)
    }
}

/// Waits for the next termination signal.
#[cfg(unix)]
pub async fn termination_signal() -> std::io::Result<TerminationSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let received = tokio::select! {
        _ = interrupt.recv() => TerminationSignal::Interrupt,
        _ = terminate.recv() => TerminationSignal::Terminate,
        _ = hangup.recv() => TerminationSignal::Hangup,
    };
    Ok(received)
}

/// Waits for Ctrl-C.
#[cfg(not(unix))]
pub async fn termination_signal() -> std::io::Result<TerminationSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(TerminationSignal::Interrupt)
}

// ============================================================================
// Shutdown Hooks
// ============================================================================

/// Identifies a registered hook so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Ordered set of cleanup hooks run on host termination.
pub struct ShutdownHooks {
    next_id: AtomicU64,
    hooks: Mutex<Vec<(HookId, &'static str, Hook)>>,
    listening: AtomicBool,
}

impl Default for ShutdownHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            hooks: Mutex::new(Vec::new()),
            listening: AtomicBool::new(false),
        }
    }

    /// The process-wide hook set used by the launcher.
    pub fn global() -> &'static ShutdownHooks {
        static GLOBAL: OnceLock<ShutdownHooks> = OnceLock::new();
        GLOBAL.get_or_init(ShutdownHooks::new)
    }

    /// Adds a hook. `name` only appears in logs.
    pub fn register<F, Fut>(&self, name: &'static str, hook: F) -> HookId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let hook: Hook = Arc::new(move || Box::pin(hook()) as HookFuture);
        self.lock().push((id, name, hook));
        debug!(hook = name, "Registered shutdown hook");
        id
    }

    /// Removes a hook. Returns false if it was not registered.
    pub fn unregister(&self, id: HookId) -> bool {
        let mut hooks = self.lock();
        let before = hooks.len();
        hooks.retain(|(hook_id, _, _)| *hook_id != id);
        hooks.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every hook, in registration order.
    pub async fn run(&self) {
        let hooks: Vec<(&'static str, Hook)> = self
            .lock()
            .iter()
            .map(|(_, name, hook)| (*name, Arc::clone(hook)))
            .collect();

        for (name, hook) in hooks {
            debug!(hook = name, "Running shutdown hook");
            hook().await;
        }
    }

    /// Starts the signal listener once. Must be called from within a Tokio
    /// runtime; outside one this only logs a warning.
    pub fn listen(&'static self) {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No Tokio runtime; termination signals will not stop the tunnel");
            return;
        }
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        // Cleared when the task ends or its runtime shuts down, so a later
        // runtime can listen again.
        let listening = ListeningFlag(&self.listening);
        tokio::spawn(async move {
            let _listening = listening;
            match termination_signal().await {
                Ok(signal) => {
                    info!(%signal, "Shutting down");
                    self.run().await;
                    std::process::exit(signal.exit_code());
                }
                Err(e) => warn!(error = %e, "Failed to listen for termination signals"),
            }
        });
    }

    /// Whether a listener task is currently armed.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(HookId, &'static str, Hook)>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ListeningFlag(&'static AtomicBool);

impl Drop for ListeningFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_exit_codes() {
        assert_eq!(TerminationSignal::Interrupt.exit_code(), 130);
        assert_eq!(TerminationSignal::Terminate.exit_code(), 143);
        assert_eq!(TerminationSignal::Hangup.exit_code(), 129);
        assert_eq!(TerminationSignal::Terminate.to_string(), "SIGTERM");
    }

    #[tokio::test]
    async fn test_hooks_run_in_order() {
        let hooks = ShutdownHooks::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let order = order.clone();
            hooks.register(name, move || {
                let order = order.clone();
                async move { order.lock().unwrap().push(name) }
            });
        }

        hooks.run().await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_listener_rearms_on_new_runtime() {
        static HOOKS: OnceLock<ShutdownHooks> = OnceLock::new();
        let hooks = HOOKS.get_or_init(ShutdownHooks::new);

        for _ in 0..2 {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                hooks.listen();
                tokio::task::yield_now().await;
            });
            assert!(hooks.is_listening());

            drop(runtime);
            assert!(!hooks.is_listening());
        }
    }

    #[tokio::test]
    async fn test_unregister() {
        let hooks = ShutdownHooks::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let id = hooks.register("count", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(hooks.len(), 1);

        assert!(hooks.unregister(id));
        assert!(!hooks.unregister(id));
        assert!(hooks.is_empty());

        hooks.run().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
