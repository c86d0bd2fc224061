//! `faxt` — the REPL and script runner for the fax language (spec.md §6).
//!
//! With no path argument it launches an interactive REPL; with exactly one
//! path argument it compiles and runs that file. Any other argument count
//! is rejected by `clap` itself, which prints usage and exits non-zero —
//! the same "any other argument count" behavior spec.md asks for.

mod config;
mod error;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use faxc_runtime::{Vm, VmError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use error::FaxtError;

/// Exit code spec.md §6 assigns to a successful run.
const EXIT_OK: u8 = 0;
/// Exit code for a compile-time (scanner or compiler) error.
const EXIT_COMPILE_ERROR: u8 = 65;
/// Exit code for a runtime (VM dispatch-loop) error.
const EXIT_RUNTIME_ERROR: u8 = 70;
/// Exit code for a file I/O failure reading the script or the config file.
const EXIT_IO_ERROR: u8 = 74;
/// Conventional `EX_USAGE`, used when configuration itself cannot be read.
const EXIT_USAGE_ERROR: u8 = 64;

/// fax — a small dynamically-typed scripting language.
#[derive(Parser, Debug)]
#[command(name = "faxt")]
#[command(author = "Fax Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a fax script, or start a REPL with no arguments")]
struct Cli {
    /// Script to run. Omit to start an interactive REPL.
    path: Option<PathBuf>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, env = "FAXT_VERBOSE")]
    verbose: bool,

    /// Disable colored log output.
    #[arg(long, env = "FAXT_NO_COLOR")]
    no_color: bool,

    /// Path to a faxt.toml configuration file (defaults to ./faxt.toml).
    #[arg(short, long, env = "FAXT_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.no_color) {
        eprintln!("{e}");
        return ExitCode::from(EXIT_USAGE_ERROR);
    }

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_USAGE_ERROR);
        }
    };

    let mut vm = Vm::with_gc_config(config.gc_next, config.gc_grow_factor);
    vm.set_stress_gc(config.stress_gc);

    let code = match cli.path {
        None => run_repl(&mut vm),
        Some(path) => run_file(&mut vm, &path),
    };
    ExitCode::from(code)
}

fn init_logging(verbose: bool, no_color: bool) -> error::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let subscriber = fmt::layer()
        .with_ansi(!no_color)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(subscriber)
        .try_init()
        .map_err(|e| FaxtError::Config(format!("failed to initialize logging: {e}")))?;

    Ok(())
}

fn load_config(config_path: Option<&std::path::Path>) -> error::Result<Config> {
    match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

/// Reads one line at a time and feeds each to the same `Vm`, matching
/// `original_source`'s `repl()` — globals and classes declared on one line
/// are visible to the next (SPEC_FULL.md §11). EOF (Ctrl-D) ends the loop
/// successfully rather than being treated as an error.
fn run_repl(vm: &mut Vm) -> u8 {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return EXIT_IO_ERROR;
        }

        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(_)) => return EXIT_IO_ERROR,
            None => {
                println!();
                return EXIT_OK;
            }
        };

        if let Err(e) = vm.interpret(&line) {
            report(&e);
        }
    }
}

/// Compiles and runs a single script file, translating the two VM failure
/// modes (spec.md §7) into their own exit codes rather than collapsing them.
fn run_file(vm: &mut Vm, path: &PathBuf) -> u8 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not read file \"{}\": {e}", path.display());
            return EXIT_IO_ERROR;
        }
    };

    match vm.interpret(&source) {
        Ok(()) => EXIT_OK,
        Err(e @ VmError::Compile(_)) => {
            report(&e);
            EXIT_COMPILE_ERROR
        }
        Err(e @ VmError::Runtime(_)) => {
            report(&e);
            EXIT_RUNTIME_ERROR
        }
    }
}

fn report(err: &VmError) {
    eprintln!("{err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_path_is_repl_mode() {
        let cli = Cli::parse_from(["faxt"]);
        assert!(cli.path.is_none());
    }

    #[test]
    fn test_cli_parse_one_path_is_script_mode() {
        let cli = Cli::parse_from(["faxt", "script.fax"]);
        assert_eq!(cli.path, Some(PathBuf::from("script.fax")));
    }

    #[test]
    fn test_cli_parse_two_paths_is_an_error() {
        let result = Cli::try_parse_from(["faxt", "a.fax", "b.fax"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_global_verbose() {
        let cli = Cli::parse_from(["faxt", "--verbose"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_parse_global_config() {
        let cli = Cli::parse_from(["faxt", "--config", "/path/to/faxt.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/faxt.toml")));
    }

    #[test]
    fn test_cli_parse_global_no_color() {
        let cli = Cli::parse_from(["faxt", "--no-color"]);
        assert!(cli.no_color);
    }

    #[test]
    fn test_run_file_missing_file_is_io_error() {
        let mut vm = Vm::with_writer(Box::new(Vec::new()));
        let code = run_file(&mut vm, &PathBuf::from("/nonexistent/path/does-not-exist.fax"));
        assert_eq!(code, EXIT_IO_ERROR);
    }

    #[test]
    fn test_run_file_compile_error_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.fax");
        std::fs::write(&path, "print;").unwrap();

        let mut vm = Vm::with_writer(Box::new(Vec::new()));
        assert_eq!(run_file(&mut vm, &path), EXIT_COMPILE_ERROR);
    }

    #[test]
    fn test_run_file_runtime_error_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("boom.fax");
        std::fs::write(&path, "print 1 + nil;").unwrap();

        let mut vm = Vm::with_writer(Box::new(Vec::new()));
        assert_eq!(run_file(&mut vm, &path), EXIT_RUNTIME_ERROR);
    }

    #[test]
    fn test_run_file_success_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ok.fax");
        std::fs::write(&path, "print 1 + 1;").unwrap();

        let mut vm = Vm::with_writer(Box::new(Vec::new()));
        assert_eq!(run_file(&mut vm, &path), EXIT_OK);
    }
}
