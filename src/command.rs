use nix::unistd::Pid;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

pub const EXIT_SUCCESS: ExitCode = 0;
pub const EXIT_FAILURE: ExitCode = 1;

/// Where a stage sits in its pipe chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// The chain has a single stage: no pipe at all.
    None,
    /// Writes into the chain, reads the terminal.
    First,
    /// Reads the previous stage and writes the next one.
    Middle,
    /// Reads the previous stage, writes the terminal (or its redirect target).
    Last,
}

impl Position {
    /// Position of stage `index` in a chain of `len` stages.
    pub fn in_chain(index: usize, len: usize) -> Self {
        match (index, len) {
            (_, 0 | 1) => Position::None,
            (0, _) => Position::First,
            (i, n) if i + 1 == n => Position::Last,
            _ => Position::Middle,
        }
    }

    /// The stage whose completion ends a foreground chain.
    pub fn ends_chain(self) -> bool {
        matches!(self, Position::None | Position::Last)
    }
}

/// One command of a pipe chain, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeStage {
    /// Program or built-in name; always equal to `arguments[0]`.
    pub command: String,
    /// Full argument vector, command included.
    pub arguments: Vec<String>,
    pub position: Position,
    /// File that replaces standard output, opened in append mode.
    pub redirect_target: Option<String>,
}

/// `&`-delimited part of a line: a pipe chain sharing one foreground/background fate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundGroup {
    pub group_index: usize,
    pub runs_in_background: bool,
    pub stages: Vec<PipeStage>,
}

/// What kind of program a child process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A built-in executed in a throwaway fork.
    ForkedBuiltin,
    /// An exec'd program.
    External,
}

/// A child process created by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
    pub pid: Pid,
    pub role: Role,
    /// Whether the interpreter blocks on this child before the next line.
    pub foreground: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_stage_has_no_position() {
        assert_eq!(Position::in_chain(0, 1), Position::None);
    }

    #[test]
    fn chain_positions() {
        let positions: Vec<_> = (0..4).map(|i| Position::in_chain(i, 4)).collect();
        assert_eq!(
            positions,
            vec![
                Position::First,
                Position::Middle,
                Position::Middle,
                Position::Last
            ]
        );
        assert_eq!(Position::in_chain(1, 2), Position::Last);
    }
}
