//! `tdbx <config-path> <command> <args...>` (§6.3): a thin translator from
//! argv into one `tdbx::Engine` call. Loads the config, opens the engine,
//! dispatches exactly one command, prints the result, and exits 0. On any
//! engine error it prints the message to stderr and exits 1 -- no retries,
//! no REPL, no interpretation of the result beyond pretty-printing.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tdbx::{Config, Engine};
use tdbx_cli::command::{self, Output};
use tdbx_cli::trace;

#[derive(Debug, Parser)]
#[command(name = "tdbx", about = "A thin front-end over the tdbx embedded document database")]
struct Args {
    /// Path to a `key=value` configuration file (§6.2).
    config_path: PathBuf,

    #[command(subcommand)]
    command: command::Command,

    /// Log level for the rolling log file (`error`, `warn`, `info`, `debug`, `trace`).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let log_dir = format!("{}/.tdbx", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guard = match trace::init_logging(&log_dir, &args.log_level) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), String> {
    let config = Config::from_file(&args.config_path).map_err(|e| e.to_string())?;
    let engine = Engine::open(config).map_err(|e| e.to_string())?;

    match command::dispatch(&engine, args.command).map_err(|e| e.to_string())? {
        Output::Json(value) => {
            println!("{}", serde_json::to_string_pretty(&value).map_err(|e| e.to_string())?);
        }
        Output::Ack => println!("OK"),
    }
    Ok(())
}
