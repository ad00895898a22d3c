use std::fmt;

/// Errors produced while turning a line into running processes.
///
/// The variant decides how far a failure reaches: a [`ShellError::Parse`] drops one
/// background group, an [`ShellError::Exec`] only ever kills the forked child, while
/// [`ShellError::is_fatal`] resource failures take the whole interpreter down.
#[derive(Debug)]
pub enum ShellError {
    /// The text of a stage cannot be turned into a command.
    Parse(ParseError),
    /// A pipe, fork, open or descriptor duplication failed.
    Resource {
        /// What the interpreter was trying to do.
        op: ResourceOp,
        /// Underlying OS error.
        source: nix::Error,
    },
    /// The program could not be found or its image could not be loaded.
    Exec {
        command: String,
        reason: String,
    },
    /// Installing or restoring a signal disposition failed.
    Signal(String),
    /// The wildcard expander could not read the current directory.
    Expand(std::io::Error),
}

/// Malformed command text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// `>` was the last token of a stage.
    MissingRedirectTarget,
    /// More than one `>` in a single stage.
    MultipleRedirects,
    /// A `|` with nothing on one of its sides.
    EmptyPipeStage,
    /// A stage without a command word (e.g. `> out.txt`).
    MissingCommand,
    /// Program arguments cannot carry NUL bytes.
    NulByte,
}

/// System operations that can fail with a [`ShellError::Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceOp {
    Pipe,
    Fork,
    Open,
    Dup,
}

impl ShellError {
    pub(crate) fn resource(op: ResourceOp, source: nix::Error) -> Self {
        ShellError::Resource { op, source }
    }

    /// Pipe and duplication failures leave descriptor state undefined for every
    /// later stage, so they abort the process that hit them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShellError::Resource {
                op: ResourceOp::Pipe | ResourceOp::Dup,
                ..
            }
        )
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingRedirectTarget => write!(f, "missing file name after '>'"),
            ParseError::MultipleRedirects => write!(f, "only one '>' redirection per command"),
            ParseError::EmptyPipeStage => write!(f, "empty command around '|'"),
            ParseError::MissingCommand => write!(f, "missing command name"),
            ParseError::NulByte => write!(f, "command contains a NUL byte"),
        }
    }
}

impl fmt::Display for ResourceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceOp::Pipe => "create pipe",
            ResourceOp::Fork => "fork process",
            ResourceOp::Open => "open redirection file",
            ResourceOp::Dup => "redirect standard stream",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::Parse(e) => write!(f, "parse error: {e}"),
            ShellError::Resource { op, source } => write!(f, "can't {op}: {source}"),
            ShellError::Exec { command, reason } => write!(f, "{command}: {reason}"),
            ShellError::Signal(msg) => write!(f, "signal setup failed: {msg}"),
            ShellError::Expand(e) => write!(f, "can't expand '*': {e}"),
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShellError::Resource { source, .. } => Some(source),
            ShellError::Expand(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for ShellError {
    fn from(e: ParseError) -> Self {
        ShellError::Parse(e)
    }
}
