//! Job supervision: one foreground slot, a set of background children, prompt redraw.

use crate::command::{EXIT_FAILURE, EXIT_SUCCESS, ExitCode};
use crate::signals::SignalSink;
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Value of the foreground slot when the interpreter itself is in the foreground.
pub const NO_FOREGROUND: i32 = -1;

/// Shared between the control thread and the signal thread.
///
/// Only children registered with [`Supervisor::track_background`] are ever reaped
/// asynchronously; the foreground child is waited for by the control thread alone.
#[derive(Debug)]
pub struct Supervisor {
    foreground: AtomicI32,
    reading: AtomicBool,
    background: Mutex<HashSet<Pid>>,
    prompt: Mutex<String>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Non-blocking wait on one child; true once it is gone.
fn finished(pid: Pid) -> bool {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => {
            log::trace!("reaped background child {pid}");
            true
        }
        Ok(_) | Err(Errno::EINTR) => false,
        Err(Errno::ECHILD) => true,
        Err(e) => {
            log::warn!("waitpid({pid}) failed: {e}");
            true
        }
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            foreground: AtomicI32::new(NO_FOREGROUND),
            reading: AtomicBool::new(false),
            background: Mutex::new(HashSet::new()),
            prompt: Mutex::new(String::new()),
        }
    }

    pub fn foreground(&self) -> Option<Pid> {
        match self.foreground.load(Ordering::SeqCst) {
            NO_FOREGROUND => None,
            raw => Some(Pid::from_raw(raw)),
        }
    }

    /// Records a background child unless it has already terminated.
    ///
    /// The check runs under the set's lock, so a `SIGCHLD` delivered before the pid is
    /// recorded cannot leave it unreaped.
    pub fn track_background(&self, pid: Pid) {
        let mut background = lock(&self.background);
        if !finished(pid) {
            background.insert(pid);
        }
    }

    pub fn background_count(&self) -> usize {
        lock(&self.background).len()
    }

    /// Collects every tracked background child that has terminated, without blocking.
    pub fn reap_background(&self) -> usize {
        let mut background = lock(&self.background);
        let before = background.len();
        background.retain(|&pid| !finished(pid));
        before - background.len()
    }

    /// Blocks until `pid` exits or is killed; stops and continues are not completion.
    ///
    /// Returns the exit code, or 128 + signal number for a killed child.
    pub fn await_foreground(&self, pid: Pid) -> ExitCode {
        self.foreground.store(pid.as_raw(), Ordering::SeqCst);
        let code = loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, code)) => break code,
                Ok(WaitStatus::Signaled(_, signal, _)) => break 128 + signal as i32,
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => break EXIT_SUCCESS,
                Err(e) => {
                    log::error!("waitpid({pid}) failed: {e}");
                    break EXIT_FAILURE;
                }
            }
        };
        self.foreground.store(NO_FOREGROUND, Ordering::SeqCst);
        log::debug!("foreground child {pid} finished with {code}");
        code
    }

    /// Marks the start of a blocking line read and remembers the prompt shown for it.
    pub fn begin_read(&self, prompt: &str) {
        prompt.clone_into(&mut lock(&self.prompt));
        self.reading.store(true, Ordering::SeqCst);
    }

    pub fn end_read(&self) {
        self.reading.store(false, Ordering::SeqCst);
    }

    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::SeqCst)
    }

    fn idle_at_prompt(&self) -> bool {
        self.is_reading() && self.foreground().is_none()
    }

    /// Reprints the prompt on a fresh line if a line is being read.
    pub fn redraw_prompt(&self, out: &mut dyn Write) -> io::Result<bool> {
        if !self.idle_at_prompt() {
            return Ok(false);
        }
        write!(out, "\n{}", lock(&self.prompt))?;
        out.flush()?;
        Ok(true)
    }

    /// Moves to a fresh line if a line is being read.
    pub fn quit_newline(&self, out: &mut dyn Write) -> io::Result<bool> {
        if !self.idle_at_prompt() {
            return Ok(false);
        }
        writeln!(out)?;
        out.flush()?;
        Ok(true)
    }
}

impl SignalSink for Supervisor {
    fn child_exited(&self) {
        self.reap_background();
    }

    fn interrupted(&self) {
        let _ = self.redraw_prompt(&mut io::stdout());
    }

    fn quit(&self) {
        let _ = self.quit_newline(&mut io::stdout());
    }
}
