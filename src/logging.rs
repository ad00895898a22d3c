//! Diagnostic logging setup and the decorated messages shown to the user.

use crate::command::EXIT_FAILURE;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

const RED: &str = "\x1b[31m";
const LIGHT_RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const RESET: &str = "\x1b[37m";

/// Routes `log` records to `log_file` (appending) or to the terminal.
///
/// Failing to set up logging is not worth stopping the interpreter for, so errors are
/// reported and otherwise ignored.
pub fn init(level: LevelFilter, log_file: Option<&Path>) {
    let config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Debug)
        .set_thread_level(LevelFilter::Trace)
        .build();

    let result = match log_file {
        Some(path) => OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| e.to_string())
            .and_then(|file| {
                WriteLogger::init(level, config, file).map_err(|e| e.to_string())
            }),
        None => TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto)
            .map_err(|e| e.to_string()),
    };
    if let Err(e) = result {
        error("Can't set up logging.", &e);
    }
}

fn decorated(color: &str, tag: &str, what: &str, detail: &str) -> String {
    format!("{color}[{tag}] {what}\n{detail}\n{RESET}")
}

fn emit(message: &str) {
    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_all(message.as_bytes());
    let _ = stderr.flush();
}

/// Reports a failure that leaves the interpreter unusable and exits.
pub fn critic(what: &str, detail: &str) -> ! {
    log::error!("{what} {detail}");
    emit(&decorated(RED, "CRITIC", what, detail));
    std::process::exit(EXIT_FAILURE)
}

pub fn error(what: &str, detail: &str) {
    emit(&decorated(LIGHT_RED, "ERROR", what, detail));
}

pub fn warning(what: &str, detail: &str) {
    emit(&decorated(YELLOW, "WARNING", what, detail));
}

/// Preformatted warning for a forked child, which writes it with a raw `write`.
pub fn warning_text(what: &str, detail: &str) -> Vec<u8> {
    decorated(YELLOW, "WARNING", what, detail).into_bytes()
}

pub fn error_text(what: &str, detail: &str) -> Vec<u8> {
    decorated(LIGHT_RED, "ERROR", what, detail).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_is_tagged_and_colored() {
        let text = String::from_utf8(warning_text("Wrong command", "nope: not found")).unwrap();
        assert!(text.starts_with("\x1b[93m[WARNING] Wrong command\n"));
        assert!(text.contains("nope: not found\n"));
        assert!(text.ends_with(RESET));
    }
}
