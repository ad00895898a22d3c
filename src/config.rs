use argh::FromArgs;
use simplelog::LevelFilter;
use std::path::PathBuf;

const HISTORY_FILE: &str = ".pipesh_history";

#[derive(FromArgs, Debug, PartialEq)]
/// A small interactive shell with pipes, `>` redirection and `&` background groups.
pub struct Options {
    #[argh(option, short = 'c')]
    /// script file to run before reading from standard input
    pub script: Option<PathBuf>,

    #[argh(switch, short = 'i')]
    /// interactive mode (default)
    pub interactive: bool,

    #[argh(option)]
    /// append diagnostic logs to this file instead of the terminal
    pub log_file: Option<PathBuf>,

    #[argh(option, default = "LevelFilter::Warn", from_str_fn(parse_level))]
    /// diagnostic log level: off, error, warn, info, debug or trace
    pub log_level: LevelFilter,

    #[argh(option)]
    /// line editor history file (default: ~/.pipesh_history)
    pub history: Option<PathBuf>,
}

fn parse_level(value: &str) -> Result<LevelFilter, String> {
    value
        .parse()
        .map_err(|_| format!("unknown log level '{value}'"))
}

impl Options {
    /// Whether a prompt and banner are shown from the start.
    pub fn starts_interactive(&self) -> bool {
        self.interactive || self.script.is_none()
    }

    /// History file to use, if one can be located.
    pub fn history_path(&self, home: Option<PathBuf>) -> Option<PathBuf> {
        self.history
            .clone()
            .or_else(|| home.map(|home| home.join(HISTORY_FILE)))
    }
}
