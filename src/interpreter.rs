use crate::builtin::{self, Builtin, BuiltinContext};
use crate::command::{
    BackgroundGroup, ChildHandle, EXIT_FAILURE, EXIT_SUCCESS, ExitCode, PipeStage, Position, Role,
};
use crate::env::ShellState;
use crate::error::{ResourceOp, ShellError};
use crate::expand::expand;
use crate::external::{
    ChildStdout, ExecPlan, Spawned, child_exit, child_report, run_external_child, spawn,
};
use crate::jobs::Supervisor;
use crate::logging;
use crate::parser::parse_line;
use crate::pipes::{PipeWiring, StageWiring};
use crate::redirect::open_append;
use crate::signals::{SignalPolicy, SignalSink};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;

/// Longest line handed to the parser; the rest is dropped.
pub const MAX_LINE_BYTES: usize = 8192;

/// What the dispatcher did with one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    /// A built-in ran in the interpreter.
    Completed(ExitCode),
    /// A child that ends the foreground chain; wait for it.
    Await(ChildHandle),
    /// A child that runs on its own.
    Detached(ChildHandle),
}

/// Reads lines, splits them into background groups and pipe chains, and runs them.
///
/// Example
/// ```no_run
/// use pipesh::{Interpreter, PassiveSignals};
/// let mut sh = Interpreter::new(Box::new(PassiveSignals));
/// let code = sh.execute_line("echo hello | cat");
/// assert_eq!(code, 0);
/// ```
pub struct Interpreter {
    state: ShellState,
    supervisor: Arc<Supervisor>,
    signals: Box<dyn SignalPolicy>,
    last_status: ExitCode,
}

impl Interpreter {
    /// Create an interpreter over the current process state.
    pub fn new(signals: Box<dyn SignalPolicy>) -> Self {
        Self::with_state(ShellState::new(), signals)
    }

    pub fn with_state(state: ShellState, signals: Box<dyn SignalPolicy>) -> Self {
        Self {
            state,
            supervisor: Arc::new(Supervisor::new()),
            signals,
            last_status: EXIT_SUCCESS,
        }
    }

    pub fn state(&self) -> &ShellState {
        &self.state
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn last_status(&self) -> ExitCode {
        self.last_status
    }

    pub fn should_exit(&self) -> bool {
        self.state.should_exit
    }

    /// Installs the signal policy with the supervisor as receiver.
    pub fn start(&mut self) -> Result<(), ShellError> {
        let sink: Arc<dyn SignalSink> = self.supervisor.clone();
        self.signals.install(sink)
    }

    pub fn shutdown(&mut self) {
        self.supervisor.reap_background();
        self.signals.shutdown();
    }

    /// Runs every background group of `line` and returns the status of the last one.
    ///
    /// Errors are reported here; only pipe and descriptor failures end the process.
    pub fn execute_line(&mut self, line: &str) -> ExitCode {
        let line = truncate_line(line);
        let expanded = match expand(line, &self.state.current_dir) {
            Ok(expanded) => expanded,
            Err(e) => {
                logging::error("Can't expand wildcard.", &e.to_string());
                self.last_status = EXIT_FAILURE;
                return self.last_status;
            }
        };

        for group in parse_line(&expanded) {
            if self.state.should_exit {
                break;
            }
            let group = match group {
                Ok(group) => group,
                Err(e) => {
                    logging::warning("Can't parse command.", &e.to_string());
                    self.last_status = EXIT_FAILURE;
                    continue;
                }
            };
            match self.run_group(&group) {
                Ok(code) => self.last_status = code,
                Err(e) if e.is_fatal() => logging::critic("Can't wire pipeline.", &e.to_string()),
                Err(e) => {
                    logging::error("Can't run command.", &e.to_string());
                    self.last_status = EXIT_FAILURE;
                    if matches!(
                        e,
                        ShellError::Resource {
                            op: ResourceOp::Fork,
                            ..
                        }
                    ) {
                        break;
                    }
                }
            }
        }
        self.last_status
    }

    fn run_group(&mut self, group: &BackgroundGroup) -> Result<ExitCode, ShellError> {
        log::debug!(
            "group {} with {} stage(s), background: {}",
            group.group_index,
            group.stages.len(),
            group.runs_in_background
        );
        let mut chain = PipeWiring::new();
        let mut status = EXIT_SUCCESS;
        for (index, stage) in group.stages.iter().enumerate() {
            let has_next = index + 1 < group.stages.len();
            let wiring = chain.wire_stage(has_next)?;
            status = match self.dispatch(stage, wiring, &mut chain, group.runs_in_background)? {
                Dispatch::Completed(code) => code,
                Dispatch::Await(handle) => self.supervisor.await_foreground(handle.pid),
                Dispatch::Detached(handle) => {
                    self.supervisor.track_background(handle.pid);
                    EXIT_SUCCESS
                }
            };
        }
        Ok(status)
    }

    fn dispatch(
        &mut self,
        stage: &PipeStage,
        wiring: StageWiring,
        chain: &mut PipeWiring,
        background: bool,
    ) -> Result<Dispatch, ShellError> {
        debug_assert_eq!(wiring.position, stage.position, "{}", stage.command);
        let builtin = builtin::lookup(&stage.command);
        if let Some(builtin) = builtin {
            if !background && stage.position == Position::None {
                log::debug!("running built-in {} in the interpreter", stage.command);
                return self.run_inline(builtin, stage).map(Dispatch::Completed);
            }
        }

        let plan = ExecPlan::prepare(
            &stage.arguments,
            stage.redirect_target.as_deref(),
            &self.state,
        )?;
        let role = match builtin {
            Some(_) => Role::ForkedBuiltin,
            None => Role::External,
        };

        match spawn()? {
            Spawned::Child => {
                // Ends parked for the next stage belong to the parent only.
                chain.release();
                match builtin {
                    Some(builtin) => self.run_forked_builtin(builtin, stage, wiring, &plan),
                    None => run_external_child(wiring, &plan, self.signals.as_ref()),
                }
            }
            Spawned::Parent(pid) => {
                drop(wiring);
                let handle = ChildHandle {
                    pid,
                    role,
                    foreground: !background && stage.position.ends_chain(),
                };
                log::debug!(
                    "spawned {} as {pid} ({:?}, {:?}, foreground: {})",
                    stage.command,
                    handle.role,
                    stage.position,
                    handle.foreground
                );
                Ok(if handle.foreground {
                    Dispatch::Await(handle)
                } else {
                    Dispatch::Detached(handle)
                })
            }
        }
    }

    fn run_inline(&mut self, builtin: &Builtin, stage: &PipeStage) -> Result<ExitCode, ShellError> {
        let mut ctx = BuiltinContext {
            state: &mut self.state,
            signals: self.signals.as_ref(),
            redirect_target: None,
            forked: false,
        };
        match stage.redirect_target.as_deref() {
            Some(target) if !builtin.replaces_process => {
                let mut file = open_append(Path::new(target))?;
                Ok(builtin.run(&stage.arguments, &mut file, &mut ctx))
            }
            target => {
                ctx.redirect_target = target;
                Ok(builtin.run(&stage.arguments, &mut io::stdout(), &mut ctx))
            }
        }
    }

    fn run_forked_builtin(
        &mut self,
        builtin: &Builtin,
        stage: &PipeStage,
        wiring: StageWiring,
        plan: &ExecPlan,
    ) -> ! {
        if let Err(e) = self.signals.restore_defaults() {
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
        let mut ctx = BuiltinContext {
            state: &mut self.state,
            signals: self.signals.as_ref(),
            redirect_target: None,
            forked: true,
        };
        let code = builtin.run(&stage.arguments, &mut ChildStdout, &mut ctx);
        child_exit(code)
    }

    /// Runs every line of `script` without a prompt, stopping early on `exit`.
    pub fn run_script(&mut self, script: impl BufRead) -> io::Result<ExitCode> {
        for line in script.split(b'\n') {
            let line = line?;
            self.supervisor.reap_background();
            self.execute_line(&String::from_utf8_lossy(&line));
            if self.state.should_exit {
                break;
            }
        }
        Ok(self.last_status)
    }

    /// Interactive loop: prompt, read with history, run, until `exit` or end of input.
    pub fn repl(&mut self, history: Option<&Path>) -> anyhow::Result<ExitCode> {
        let mut rl = DefaultEditor::new()?;
        if let Some(path) = history {
            if let Err(e) = rl.load_history(path) {
                log::debug!("no history loaded from {}: {e}", path.display());
            }
        }

        while !self.state.should_exit {
            self.supervisor.reap_background();
            let prompt = self.state.prompt();
            self.supervisor.begin_read(&prompt);
            let readline = rl.readline(&prompt);
            self.supervisor.end_read();

            match readline {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    self.execute_line(&line);
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        if let Some(path) = history {
            if let Err(e) = rl.save_history(path) {
                log::warn!("can't save history to {}: {e}", path.display());
            }
        }
        Ok(EXIT_SUCCESS)
    }
}

/// Cuts `line` to [`MAX_LINE_BYTES`] on a character boundary.
fn truncate_line(line: &str) -> &str {
    if line.len() <= MAX_LINE_BYTES {
        return line;
    }
    let mut end = MAX_LINE_BYTES;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    log::warn!("line truncated to {end} bytes");
    &line[..end]
}
