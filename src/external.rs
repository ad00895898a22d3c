//! Process creation and image replacement for commands that are not built-ins.

use crate::command::{EXIT_FAILURE, ExitCode};
use crate::env::ShellState;
use crate::error::{ParseError, ResourceOp, ShellError};
use crate::logging;
use crate::pipes::StageWiring;
use crate::redirect::redirect_stdout;
use crate::signals::SignalPolicy;
use nix::libc;
use nix::unistd::{ForkResult, Pid, execv, fork, write};
use std::borrow::Cow;
use std::ffi::{CString, OsStr};
use std::io::{self, Write};
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Outcome of [`spawn`], seen once in each process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spawned {
    Parent(Pid),
    Child,
}

/// Forks the interpreter. Buffered standard output is flushed first so the child
/// does not repeat it.
pub fn spawn() -> Result<Spawned, ShellError> {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    // SAFETY: the child only rewires descriptors, runs a built-in or execs, and
    // always leaves through `child_exit` or a successful exec.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(Spawned::Parent(child)),
        Ok(ForkResult::Child) => Ok(Spawned::Child),
        Err(e) => Err(ShellError::resource(ResourceOp::Fork, e)),
    }
}

/// Writes straight to fd 2, bypassing the lock around `std::io::stderr`, which
/// another thread may have held at fork time.
pub fn child_report(message: &[u8]) {
    // SAFETY: `message` is a valid buffer for its whole length.
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            message.as_ptr().cast(),
            message.len(),
        );
    }
}

/// Unbuffered writer on fd 1 for built-ins running in a forked child.
pub struct ChildStdout;

impl Write for ChildStdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: fd 1 stays open until the child exits.
        let fd = unsafe { BorrowedFd::borrow_raw(libc::STDOUT_FILENO) };
        Ok(write(fd, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Terminates a forked child without running the parent's exit handlers.
pub fn child_exit(code: ExitCode) -> ! {
    // SAFETY: `_exit` is async-signal-safe and never returns.
    unsafe { libc::_exit(code) }
}

/// Everything an external command needs after the fork, computed before it.
#[derive(Debug)]
pub struct ExecPlan {
    name: String,
    program: Option<CString>,
    argv: Vec<CString>,
    redirect: Option<CString>,
}

fn c_string(text: &str) -> Result<CString, ShellError> {
    CString::new(text).map_err(|_| ShellError::Parse(ParseError::NulByte))
}

impl ExecPlan {
    /// Resolves the program against `PATH` and converts the arguments.
    pub fn prepare(
        arguments: &[String],
        redirect_target: Option<&str>,
        state: &ShellState,
    ) -> Result<Self, ShellError> {
        let name = arguments.first().cloned().unwrap_or_default();
        let search_paths = state.get_var("PATH").unwrap_or_default();
        let program = find_command_path(OsStr::new(&search_paths), Path::new(&name))
            .map(|path| CString::new(path.as_os_str().as_bytes()))
            .transpose()
            .map_err(|_| ShellError::Parse(ParseError::NulByte))?;
        let argv = arguments
            .iter()
            .map(|arg| c_string(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let redirect = redirect_target.map(c_string).transpose()?;

        Ok(Self {
            name,
            program,
            argv,
            redirect,
        })
    }

    #[cfg(test)]
    fn is_resolved(&self) -> bool {
        self.program.is_some()
    }

    /// Applies the redirection, if any, onto the current standard output.
    pub fn redirect(&self) -> Result<(), ShellError> {
        match &self.redirect {
            Some(target) => redirect_stdout(target),
            None => Ok(()),
        }
    }

    /// Replaces the process image. Only returns on failure.
    pub fn exec(&self) -> ShellError {
        let Some(program) = &self.program else {
            return ShellError::Exec {
                command: self.name.clone(),
                reason: "command not found".into(),
            };
        };
        match execv(program, &self.argv) {
            Err(e) => ShellError::Exec {
                command: self.name.clone(),
                reason: e.desc().into(),
            },
            Ok(never) => match never {},
        }
    }
}

/// Child side of an external stage: default signals, wiring, redirection, exec.
pub fn run_external_child(wiring: StageWiring, plan: &ExecPlan, signals: &dyn SignalPolicy) -> ! {
    if let Err(e) = signals.restore_defaults() {
        child_report(&logging::warning_text("Can't restore default signals.", &e.to_string()));
    }
    if let Err(e) = wiring.connect() {
        child_report(&logging::warning_text("Can't connect pipe.", &e.to_string()));
        child_exit(EXIT_FAILURE);
    }
    if let Err(e) = plan.redirect() {
        child_report(&logging::warning_text("Can't redirect output.", &e.to_string()));
        child_exit(EXIT_FAILURE);
    }
    let failure = plan.exec();
    child_report(&logging::warning_text("Wrong command", &failure.to_string()));
    child_exit(EXIT_FAILURE)
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`): returns it if it exists.
/// - `./foo`: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first existing match.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    if path.starts_with("./") && path.exists() {
        return Some(Cow::Borrowed(path));
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        // Empty path -> not found
        (None, None) => None,
        // Single component -> search in PATH
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        // Multiple components -> search in current dir
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|path| path.is_file())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::fs::File;

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    #[test]
    fn absolute_existing_true() {
        let path = Path::new("/bin/sh");
        let found = find_command_path(osstr("/bin"), path).expect("absolute /bin/sh");
        assert_eq!(found.as_ref(), path);
    }

    #[test]
    fn absolute_nonexisting() {
        let path = Path::new("/bin/nonexisting");
        assert!(find_command_path(osstr("/bin"), path).is_none());
    }

    #[test]
    fn single_component_found_in_path() {
        let found = find_command_path(osstr("/nowhere:/bin"), Path::new("sh"))
            .expect("Expected to find 'sh' in /bin via PATH search");
        assert_eq!(found.as_ref(), Path::new("/bin/sh"));
    }

    #[test]
    fn directories_in_path_are_skipped() {
        let base = std::env::temp_dir().join(format!("external_tests_{}_dir", std::process::id()));
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(base.join("sh")).expect("create decoy dir");
        let search = format!("{}:/bin", base.display());
        let found = find_command_path(osstr(&search), Path::new("sh")).expect("sh");
        assert_eq!(found.as_ref(), Path::new("/bin/sh"));
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn single_component_not_found_in_path() {
        assert!(find_command_path(osstr("/bin"), Path::new("nonexisting")).is_none());
    }

    #[test]
    fn multiple_components_relative_existing() {
        let _cwd = crate::test_support::lock_current_dir();
        let cwd_before = std::env::current_dir().expect("cwd");
        let tmp_base =
            std::env::temp_dir().join(format!("external_tests_{}_mc", std::process::id()));
        let _ = fs::remove_dir_all(&tmp_base);
        fs::create_dir_all(tmp_base.join("bin")).expect("create temp bin dir");
        File::create(tmp_base.join("bin").join("sh")).expect("touch bin/sh");

        std::env::set_current_dir(&tmp_base).expect("set cwd");
        let res = find_command_path(osstr("/does/not/matter"), Path::new("bin/sh"))
            .map(|p| p.into_owned());
        std::env::set_current_dir(&cwd_before).ok();

        let found = res.expect("Expected to find relative 'bin/sh' in current dir");
        assert!(found.ends_with("bin/sh"));
        let _ = fs::remove_dir_all(tmp_base);
    }

    #[test]
    fn empty_path_is_none() {
        assert!(find_command_path(osstr("/bin"), Path::new("")).is_none());
    }

    #[test]
    fn plan_for_unknown_command_is_unresolved() {
        let mut state = ShellState::new();
        state.vars.insert("PATH".into(), "/bin:/usr/bin".into());
        let plan = ExecPlan::prepare(&["nope-xyz".to_string()], None, &state).unwrap();
        assert!(!plan.is_resolved());
        assert!(matches!(plan.exec(), ShellError::Exec { ref reason, .. } if reason == "command not found"));
    }

    #[test]
    fn plan_keeps_argument_vector() {
        let mut state = ShellState::new();
        state.vars.insert("PATH".into(), "/bin:/usr/bin".into());
        let args: Vec<String> = ["sh", "-c", "true"].iter().map(|s| s.to_string()).collect();
        let plan = ExecPlan::prepare(&args, Some("out.txt"), &state).unwrap();
        assert!(plan.is_resolved());
        assert_eq!(plan.argv.len(), 3);
        assert_eq!(plan.redirect.as_deref(), Some(c"out.txt"));
    }
}
