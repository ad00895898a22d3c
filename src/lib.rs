//! A small interactive shell built around pipe chains and background groups.
//!
//! A line is split on `&` into background groups, each group on `|` into stages,
//! and each stage into a command with an optional `> file` redirection. Stages are
//! connected through at most two live pipes at a time, run as forked children or,
//! for built-ins in the foreground, inside the interpreter. The [`jobs`] supervisor
//! waits for the foreground stage and reaps background children on `SIGCHLD`.
//!
//! The main entry point is [`Interpreter`]; [`Options`] holds the command-line flags
//! of the `pipesh` binary.

mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
mod expand;
mod external;
mod interpreter;
pub mod jobs;
mod lexer;
pub mod logging;
pub mod parser;
pub mod pipes;
mod redirect;
pub mod signals;

pub use config::Options;
pub use error::{ParseError, ShellError};
pub use interpreter::{Interpreter, MAX_LINE_BYTES};
pub use signals::{PassiveSignals, SignalPolicy, UnixSignals};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

    /// Serializes tests that read or change the process working directory.
    pub fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
