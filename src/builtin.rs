use crate::command::{EXIT_FAILURE, EXIT_SUCCESS, ExitCode};
use crate::env::ShellState;
use crate::external::{ExecPlan, child_report};
use crate::logging;
use crate::redirect::SavedStdout;
use crate::signals::{DefaultsScope, SignalPolicy};
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// What a built-in may touch besides its output stream.
pub struct BuiltinContext<'a> {
    pub state: &'a mut ShellState,
    pub signals: &'a dyn SignalPolicy,
    /// Redirection still to be applied by a built-in that replaces the process.
    pub redirect_target: Option<&'a str>,
    /// Running in a throwaway child rather than in the interpreter.
    pub forked: bool,
}

impl BuiltinContext<'_> {
    /// Reports an error on stderr, without taking the std stream lock in a child.
    pub fn report(&self, what: &str, detail: &str) {
        if self.forked {
            child_report(&logging::error_text(what, detail));
        } else {
            logging::error(what, detail);
        }
    }
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and run either in the
/// interpreter or in a forked child, depending on where the stage sits.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "pwd" or "cd".
    const NAME: &'static str;

    /// One-line summary shown by `help`.
    const DESCRIPTION: &'static str;

    /// Handles its own redirection because it never returns on success.
    const REPLACES_PROCESS: bool = false;

    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode>;
}

type Runner = fn(&[String], &mut dyn Write, &mut BuiltinContext<'_>) -> ExitCode;

/// Entry of the built-in table.
pub struct Builtin {
    pub name: &'static str,
    pub description: &'static str,
    pub replaces_process: bool,
    run: Runner,
}

impl Builtin {
    /// Runs the built-in on a full argument vector (`arguments[0]` is the name).
    pub fn run(
        &self,
        arguments: &[String],
        stdout: &mut dyn Write,
        ctx: &mut BuiltinContext<'_>,
    ) -> ExitCode {
        (self.run)(arguments, stdout, ctx)
    }
}

const fn entry<T: BuiltinCommand>() -> Builtin {
    Builtin {
        name: T::NAME,
        description: T::DESCRIPTION,
        replaces_process: T::REPLACES_PROCESS,
        run: run_builtin::<T>,
    }
}

static BUILTINS: [Builtin; 5] = [
    entry::<Cd>(),
    entry::<Exec>(),
    entry::<Pwd>(),
    entry::<Exit>(),
    entry::<Help>(),
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn run_builtin<T: BuiltinCommand>(
    arguments: &[String],
    stdout: &mut dyn Write,
    ctx: &mut BuiltinContext<'_>,
) -> ExitCode {
    let rest: Vec<&str> = arguments.iter().skip(1).map(String::as_str).collect();
    let command = match T::from_args(&[T::NAME], &rest) {
        Ok(command) => command,
        Err(EarlyExit { output, status }) => {
            return match status {
                Ok(()) => {
                    let _ = write!(stdout, "{output}");
                    let _ = stdout.flush();
                    EXIT_SUCCESS
                }
                Err(()) => {
                    ctx.report(&format!("Usage error in {}.", T::NAME), output.trim_end());
                    EXIT_FAILURE
                }
            };
        }
    };

    let code = match command.execute(stdout, ctx) {
        Ok(code) => code,
        Err(e) => {
            ctx.report(&format!("{} failed.", T::NAME), &format!("{e:#}"));
            EXIT_FAILURE
        }
    };
    let _ = stdout.flush();
    code
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    const NAME: &'static str = "pwd";
    const DESCRIPTION: &'static str = "Print current working directory";

    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        // Another process may have removed or renamed it since the last look.
        ctx.state.current_dir = env::current_dir().context("pwd: can't get current directory")?;
        writeln!(stdout, "{}", ctx.state.current_dir.display())?;
        Ok(EXIT_SUCCESS)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    const NAME: &'static str = "cd";
    const DESCRIPTION: &'static str = "Change working directory";

    fn execute(self, _stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match ctx.state.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => bail!("cd: no target and HOME not set"),
            },
        };

        let new_dir = if target.is_absolute() {
            target
        } else {
            ctx.state.current_dir.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("cd: can't canonicalize {}", new_dir.display()))?;

        env::set_current_dir(&canonical)
            .with_context(|| format!("cd: can't chdir to {}", canonical.display()))?;
        log::debug!("working directory is now {}", canonical.display());
        ctx.state.current_dir = canonical;
        Ok(EXIT_SUCCESS)
    }
}

#[derive(FromArgs)]
/// Leave the shell.
pub struct Exit {
    #[argh(positional, greedy)]
    /// ignored; the shell always leaves with status 0
    pub _args: Vec<String>,
}

impl BuiltinCommand for Exit {
    const NAME: &'static str = "exit";
    const DESCRIPTION: &'static str = "Exit the shell";

    fn execute(self, _stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        ctx.state.should_exit = true;
        Ok(EXIT_SUCCESS)
    }
}

#[derive(FromArgs)]
/// List the built-in commands.
pub struct Help {}

impl BuiltinCommand for Help {
    const NAME: &'static str = "help";
    const DESCRIPTION: &'static str = "Print this help";

    fn execute(self, stdout: &mut dyn Write, _ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        writeln!(stdout, "\nBuilt-in commands:")?;
        writeln!(stdout, "-------------------")?;
        for builtin in &BUILTINS {
            writeln!(stdout, "{}\t{}", builtin.name, builtin.description)?;
        }
        writeln!(stdout)?;
        Ok(EXIT_SUCCESS)
    }
}

#[derive(FromArgs)]
/// Replace the shell with a program.
pub struct Exec {
    #[argh(positional, greedy)]
    /// program to run and its arguments
    pub command: Vec<String>,
}

impl BuiltinCommand for Exec {
    const NAME: &'static str = "exec";
    const DESCRIPTION: &'static str = "Execute a command in place of the shell";
    const REPLACES_PROCESS: bool = true;

    fn execute(self, stdout: &mut dyn Write, ctx: &mut BuiltinContext<'_>) -> Result<ExitCode> {
        if self.command.is_empty() {
            bail!("exec: missing command");
        }
        let plan = ExecPlan::prepare(&self.command, ctx.redirect_target, ctx.state)?;
        stdout.flush()?;
        if !ctx.forked {
            std::io::stdout().flush()?;
        }

        let failure = {
            let _stdout = match ctx.redirect_target {
                Some(_) => Some(SavedStdout::capture()?),
                None => None,
            };
            plan.redirect()?;
            let _defaults = DefaultsScope::enter(ctx.signals)?;
            plan.exec()
        };

        if ctx.forked {
            child_report(&logging::warning_text("Wrong command", &failure.to_string()));
        } else {
            logging::warning("Wrong command", &failure.to_string());
        }
        Ok(EXIT_FAILURE)
    }
}
