use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{error::ErrorKind, Parser};
use loxvm::{Config, InterpretError, Vm};
use tracing_subscriber::EnvFilter;

const EXIT_USAGE: u8 = 64;
const EXIT_COMPILE_ERROR: u8 = 65;
const EXIT_RUNTIME_ERROR: u8 = 70;
const EXIT_IO_ERROR: u8 = 74;

/// Run Lox programs on a bytecode virtual machine.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Script to run. Starts an interactive prompt when omitted.
    path: Option<PathBuf>,
    /// Collect garbage before every allocation.
    #[arg(long)]
    stress_gc: bool,
    /// Log the stack and every instruction as it is executed.
    #[arg(long)]
    trace_execution: bool,
    /// Log the bytecode of every compiled function.
    #[arg(long)]
    print_code: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    init_tracing(&cli);

    let config = Config {
        stress_gc: cli.stress_gc,
        trace_execution: cli.trace_execution,
        print_code: cli.print_code,
        ..Config::default()
    };
    let mut vm = Vm::new(config);
    match &cli.path {
        Some(path) => run_file(&mut vm, path),
        None => repl(&mut vm),
    }
}

fn init_tracing(cli: &Cli) {
    let mut directives = vec!["warn"];
    if cli.print_code {
        directives.push("loxvm::compile=debug");
    }
    if cli.trace_execution {
        directives.push("loxvm::vm=trace");
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .init();
}

fn run_file(vm: &mut Vm, path: &Path) -> ExitCode {
    let src = match fs::read_to_string(path) {
        Ok(src) => src,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {err}.", path.display());
            return ExitCode::from(EXIT_IO_ERROR);
        }
    };
    // The machine has already reported the error.
    match vm.interpret(&src) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretError::Compile(_)) => ExitCode::from(EXIT_COMPILE_ERROR),
        Err(InterpretError::Runtime { .. }) => ExitCode::from(EXIT_RUNTIME_ERROR),
    }
}

fn repl(vm: &mut Vm) -> ExitCode {
    let mut lines = io::stdin().lock().lines();
    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return ExitCode::from(EXIT_IO_ERROR);
        }
        match lines.next() {
            None => {
                println!();
                return ExitCode::SUCCESS;
            }
            Some(Ok(line)) => {
                // Errors are reported by the machine and don't end the session.
                vm.interpret(&line).ok();
            }
            Some(Err(err)) => {
                eprintln!("Could not read input: {err}.");
                return ExitCode::from(EXIT_IO_ERROR);
            }
        }
    }
}
