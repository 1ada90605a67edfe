//! catwalk CLI entry point.
//!
//! Usage:
//!   catwalk <input-file> <output-file>       # Run the canonical pipeline
//!   catwalk --worker=PATH <input> <output>   # Use a specific worker binary

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use catwalk_kernel::Pipeline;

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = env::args().collect();

    let mut worker: Option<PathBuf> = None;
    let mut files: Vec<PathBuf> = Vec::new();

    for arg in &args[1..] {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(ExitCode::SUCCESS);
            }
            "--version" | "-V" => {
                println!("catwalk {}", env!("CARGO_PKG_VERSION"));
                return Ok(ExitCode::SUCCESS);
            }
            a if a.starts_with("--worker=") => {
                worker = Some(PathBuf::from(&a["--worker=".len()..]));
            }
            a if a.starts_with('-') => {
                eprintln!("Unknown option: {a}");
                eprintln!("Run 'catwalk --help' for usage.");
                return Ok(ExitCode::FAILURE);
            }
            a => files.push(PathBuf::from(a)),
        }
    }

    let (input, output) = match files.as_slice() {
        [input, output] => (input.clone(), output.clone()),
        _ => {
            eprintln!("Usage: catwalk <input-file> <output-file>");
            return Ok(ExitCode::FAILURE);
        }
    };
    if input == output {
        bail!("input and output files must differ");
    }

    let worker = match worker {
        Some(path) => path,
        None => default_worker()?,
    };

    let result = Pipeline::canonical(worker)
        .run(&input, &output)
        .context("pipeline setup failed")?;

    for failure in result.failures() {
        eprintln!(
            "catwalk: stage {} exited with status {}",
            failure.stage, failure.code
        );
    }
    Ok(ExitCode::from(result.exit_code() as u8))
}

/// By default the worker lives next to the orchestrator binary.
fn default_worker() -> Result<PathBuf> {
    let exe = env::current_exe().context("cannot locate own executable")?;
    let dir = exe
        .parent()
        .context("executable has no parent directory")?;
    Ok(dir.join("stagehand"))
}

fn print_help() {
    println!(
        r#"catwalk v{}

Runs the canonical three-stage worker pipeline over a file:
the stages are connected by pipes, each stage verifies its
contract (descriptors, environment, checkpoint handshake)
and copies its input through.

Usage:
  catwalk <input-file> <output-file>
  catwalk --worker=PATH <input> <output>

Options:
  --worker=PATH   Worker binary (default: stagehand next to catwalk)
  -h, --help      Show this help
  -V, --version   Show version

Exit code is 0 iff every stage exited 0; failing stages are
named on stderr."#,
        env!("CARGO_PKG_VERSION")
    );
}
