//! Signal dispositions of the interpreter.
//!
//! The interpreter catches `SIGCHLD`, `SIGINT` and `SIGQUIT` through `signal-hook`'s
//! iterator and forwards them to a [`SignalSink`] on a dedicated thread. Children get
//! default dispositions back right before they exec.

use crate::error::ShellError;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use signal_hook::consts::{SIGCHLD, SIGINT, SIGQUIT};
use signal_hook::iterator::{Handle, Signals};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Signals reset to their default action before a program replaces the process image.
///
/// `SIGPIPE` is in the list because the Rust runtime ignores it, and an ignored
/// disposition would survive the exec.
const RESET_ON_EXEC: [Signal; 4] = [
    Signal::SIGCHLD,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGPIPE,
];

/// Receiver of asynchronous notifications.
pub trait SignalSink: Send + Sync + 'static {
    /// At least one child changed state; deliveries coalesce, so there may be several.
    fn child_exited(&self);
    fn interrupted(&self);
    fn quit(&self);
}

/// Dispositions replaced by [`SignalPolicy::restore_defaults`].
#[derive(Debug, Default, Clone)]
pub struct Dispositions(Vec<(Signal, SigAction)>);

impl Dispositions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Handler that was in place for `signal`, if it was captured.
    pub fn handler(&self, signal: Signal) -> Option<SigHandler> {
        self.0
            .iter()
            .find(|(saved, _)| *saved == signal)
            .map(|(_, action)| action.handler())
    }
}

/// Installs and removes the interpreter's signal handling.
pub trait SignalPolicy {
    /// Starts routing notifications to `sink`.
    fn install(&mut self, sink: Arc<dyn SignalSink>) -> Result<(), ShellError>;

    /// Stops routing notifications. Called once at shutdown.
    fn shutdown(&mut self);

    /// Sets default actions, returning what was replaced.
    fn restore_defaults(&self) -> Result<Dispositions, ShellError> {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        let mut saved = Vec::with_capacity(RESET_ON_EXEC.len());
        for signal in RESET_ON_EXEC {
            // SAFETY: installing SIG_DFL runs no handler code.
            let previous = unsafe { sigaction(signal, &default) }
                .map_err(|e| ShellError::Signal(format!("{signal}: {e}")))?;
            saved.push((signal, previous));
        }
        Ok(Dispositions(saved))
    }

    /// Puts back dispositions saved by [`SignalPolicy::restore_defaults`].
    fn reinstate(&self, saved: Dispositions) -> Result<(), ShellError> {
        for (signal, action) in saved.0 {
            // SAFETY: `action` was read back from the kernel by an earlier sigaction call.
            unsafe { sigaction(signal, &action) }
                .map_err(|e| ShellError::Signal(format!("{signal}: {e}")))?;
        }
        Ok(())
    }
}

/// Default actions for the lifetime of the scope; the previous handlers come back on
/// every exit path.
pub struct DefaultsScope<'a> {
    policy: &'a dyn SignalPolicy,
    saved: Option<Dispositions>,
}

impl<'a> DefaultsScope<'a> {
    pub fn enter(policy: &'a dyn SignalPolicy) -> Result<Self, ShellError> {
        let saved = policy.restore_defaults()?;
        Ok(Self {
            policy,
            saved: Some(saved),
        })
    }
}

impl Drop for DefaultsScope<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = self.policy.reinstate(saved) {
                log::error!("can't reinstate signal handlers: {e}");
                crate::logging::error("Can't reinstate signal handlers.", &e.to_string());
            }
        }
    }
}

/// Catches the interpreter's signals and forwards them from a background thread.
#[derive(Default)]
pub struct UnixSignals {
    handle: Option<Handle>,
    thread: Option<JoinHandle<()>>,
    /// Dispositions found at startup, put back by `shutdown`.
    startup: Option<Dispositions>,
}

impl UnixSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalPolicy for UnixSignals {
    fn install(&mut self, sink: Arc<dyn SignalSink>) -> Result<(), ShellError> {
        // sigaction can only read a disposition by replacing it.
        let startup = self.restore_defaults()?;
        self.reinstate(startup.clone())?;
        self.startup = Some(startup);

        let mut signals = Signals::new([SIGCHLD, SIGINT, SIGQUIT])
            .map_err(|e| ShellError::Signal(e.to_string()))?;
        self.handle = Some(signals.handle());
        let thread = thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                for signal in signals.forever() {
                    match signal {
                        SIGCHLD => sink.child_exited(),
                        SIGINT => sink.interrupted(),
                        SIGQUIT => sink.quit(),
                        _ => {}
                    }
                }
            })
            .map_err(|e| ShellError::Signal(e.to_string()))?;
        self.thread = Some(thread);
        log::debug!("signal handlers installed");
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Some(startup) = self.startup.take() {
            if let Err(e) = self.reinstate(startup) {
                log::error!("can't restore startup signal handlers: {e}");
            }
        }
    }
}

/// Leaves every disposition alone. Used when the interpreter is embedded, e.g. in tests.
#[derive(Debug, Default)]
pub struct PassiveSignals;

impl SignalPolicy for PassiveSignals {
    fn install(&mut self, _sink: Arc<dyn SignalSink>) -> Result<(), ShellError> {
        Ok(())
    }

    fn shutdown(&mut self) {}

    fn restore_defaults(&self) -> Result<Dispositions, ShellError> {
        Ok(Dispositions::default())
    }
}
