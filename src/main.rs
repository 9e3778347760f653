// File: src/main.rs
//
// Entry point: zero args starts the REPL, one arg runs a script file,
// anything else is a usage error (`spec.md` §6). Exit codes follow the
// same convention as the original implementation: 64 for misuse, 65 for a
// compile error, 70 for a runtime error, 74 if the script can't be read.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use lox::errors::LoxError;

#[derive(Parser)]
#[command(
    name = "lox",
    about = "Lox: a small dynamically-typed scripting language",
    version = env!("CARGO_PKG_VERSION"),
    long_about = None
)]
struct Cli {
    /// Path to a .lox script. Omit to start the REPL.
    #[arg(value_name = "SCRIPT")]
    paths: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.paths.len() {
        0 => run_repl(),
        1 => run_file(&cli.paths[0]),
        _ => {
            eprintln!("Usage: lox [script]");
            ExitCode::from(64)
        }
    }
}

fn run_file(path: &PathBuf) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file '{}': {}", path.display(), err);
            return ExitCode::from(74);
        }
    };

    let mut vm = lox::new_vm();
    match lox::interpret(&source, &mut vm) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err @ LoxError::Compile(_)) => {
            eprintln!("{}", err);
            ExitCode::from(65)
        }
        Err(err @ LoxError::Runtime(_)) => {
            eprintln!("{}", err);
            ExitCode::from(70)
        }
    }
}

fn run_repl() -> ExitCode {
    match lox::repl::Repl::new() {
        Ok(mut repl) => {
            if let Err(err) = repl.run() {
                eprintln!("REPL error: {}", err);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Failed to start REPL: {}", err);
            ExitCode::FAILURE
        }
    }
}
