use pipesh::{Interpreter, Options, UnixSignals, logging};
use std::fs::File;
use std::io::BufReader;

const BANNER: &str = "\n\n\x1b[34mHello from pipesh\nEnter 'help' for a list of built-in commands.\x1b[37m\n";

fn main() -> anyhow::Result<()> {
    let options: Options = argh::from_env();
    logging::init(options.log_level, options.log_file.as_deref());

    let mut sh = Interpreter::new(Box::new(UnixSignals::new()));
    if let Err(e) = sh.start() {
        logging::critic("Can't install signal handlers.", &e.to_string());
    }
    if options.starts_interactive() {
        println!("{BANNER}");
    }

    if let Some(path) = &options.script {
        match File::open(path) {
            Ok(file) => {
                log::info!("running script {}", path.display());
                sh.run_script(BufReader::new(file))?;
            }
            Err(e) => logging::error("Error while opening script file.", &e.to_string()),
        }
    }

    let history = options.history_path(sh.state().home.clone());
    let code = if sh.should_exit() {
        sh.last_status()
    } else {
        sh.repl(history.as_deref())?
    };

    sh.shutdown();
    std::process::exit(code)
}
