use std::collections::HashMap;
use std::env as stdenv;
use std::path::{Path, PathBuf};

use nix::unistd::{User, gethostname, geteuid};

const PROMPT_COLOR: &str = "\x1b[32m";
const PROMPT_RESET: &str = "\x1b[0m";
const PROMPT_SUFFIX: &str = "> ";

/// Process-wide state of the interpreter, alive for the whole run.
///
/// Built-ins that run in a forked child mutate the child's copy only; nothing is
/// written back to the interpreter.
#[derive(Debug, Clone)]
pub struct ShellState {
    /// Key-value store of environment variables (e.g., PATH, HOME).
    pub vars: HashMap<String, String>,
    /// Directory tracked by `cd`/`pwd`; kept equal to the process working directory.
    pub current_dir: PathBuf,
    /// `user@host:` shown in front of the prompt.
    pub user_machine: String,
    /// Home directory displayed as `~`.
    pub home: Option<PathBuf>,
    /// Set by `exit`; the read loop stops before the next group or line.
    pub should_exit: bool,
}

impl ShellState {
    /// Capture the current process state into a new `ShellState` instance.
    pub fn new() -> Self {
        let vars: HashMap<String, String> = stdenv::vars().collect();
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let user = User::from_uid(geteuid()).ok().flatten();
        let host = gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        let user_machine = match &user {
            Some(user) => format!("{}@{host}:", user.name),
            None => String::new(),
        };
        let home = user
            .map(|u| u.dir)
            .or_else(|| vars.get("HOME").map(PathBuf::from));

        Self {
            vars,
            current_dir,
            user_machine,
            home,
            should_exit: false,
        }
    }

    /// Get the value of an environment variable.
    ///
    /// Looks up the key in `self.vars` first, falling back to `std::env::var`.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| stdenv::var(key).ok())
    }

    /// Working directory with the home prefix replaced by `~`.
    pub fn pretty_dir(&self) -> String {
        prettify(&self.current_dir, self.home.as_deref())
    }

    /// Colored `user@host:` decoration, then the directory and the prompt character.
    pub fn prompt(&self) -> String {
        format!(
            "{PROMPT_COLOR}{}{PROMPT_RESET}{}{PROMPT_SUFFIX}",
            self.user_machine,
            self.pretty_dir()
        )
    }
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new()
    }
}

fn prettify(dir: &Path, home: Option<&Path>) -> String {
    match home.and_then(|home| dir.strip_prefix(home).ok()) {
        Some(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Some(rest) => format!("~/{}", rest.display()),
        None => dir.display().to_string(),
    }
}
