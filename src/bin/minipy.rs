use std::{
    fs, io,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use minipy::{
    Interpreter, InterpreterConfig, MiniPyError, Repl, Streams, runtime::DEFAULT_MAX_CALL_DEPTH,
};

#[derive(Parser)]
#[command(author, version, about = "MiniPy scripting language interpreter")]
struct Args {
    /// Deepest allowed nesting of user-function calls
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    max_depth: usize,
    /// Abort a run after executing this many statements
    #[arg(long, global = true)]
    step_limit: Option<u64>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a MiniPy script file
    Run { script: PathBuf },
    /// Start an interactive REPL session
    Repl,
    /// Evaluate a snippet of MiniPy code
    Eval { source: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = InterpreterConfig {
        max_call_depth: args.max_depth,
        step_limit: args.step_limit,
    };
    let result = match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => run_script(&script, config),
        Command::Repl => {
            let interpreter = Interpreter::with_config(Streams::stdio(), config);
            Repl::with_interpreter(interpreter).run()
        }
        Command::Eval { source } => {
            Interpreter::with_config(Streams::stdio(), config).run_source(source)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(MiniPyError::Parse(_)) => {
            eprintln!("parse failed");
            ExitCode::FAILURE
        }
        // The interpreter has already written the diagnostic.
        Err(MiniPyError::Runtime(_)) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_script(path: &Path, config: InterpreterConfig) -> Result<(), MiniPyError> {
    let source = fs::read(path).map_err(|err| {
        io::Error::new(
            err.kind(),
            format!("cannot read {}: {err}", path.display()),
        )
    })?;
    Interpreter::with_config(Streams::stdio(), config).run_source(source)
}
