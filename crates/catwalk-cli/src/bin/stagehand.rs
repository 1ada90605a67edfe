//! stagehand worker entry point.
//!
//! Usage: stagehand -<level>
//!
//! Reads stdin, enforces the contract for the given level, and writes
//! the payload to stdout. Diagnostics go to stderr, one line per
//! violation. Exit code 0 iff the contract held and the copy
//! completed.

use std::io::{stderr, stdin, stdout};
use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use catwalk_kernel::Worker;
use catwalk_types::ContractLevel;

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let arg = match args.next() {
        Some(a) => a,
        None => return usage(),
    };
    if args.next().is_some() {
        return usage();
    }
    match arg.as_str() {
        "--help" | "-h" => {
            print_help();
            return ExitCode::SUCCESS;
        }
        "--version" | "-V" => {
            println!("stagehand {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        _ => {}
    }
    let level = match parse_level(&arg) {
        Some(level) => level,
        None => return usage(),
    };

    let worker = Worker::from_process(level);
    let code = worker.run(stdin().lock(), stdout().lock(), stderr().lock());
    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(code as u8)
    }
}

/// Accepts exactly `-<digit>` where the digit names a contract level.
fn parse_level(arg: &str) -> Option<ContractLevel> {
    let digits = arg.strip_prefix('-')?;
    let mut bytes = digits.bytes();
    let b = bytes.next()?;
    if bytes.next().is_some() || !b.is_ascii_digit() {
        return None;
    }
    ContractLevel::from_digit(b - b'0')
}

fn usage() -> ExitCode {
    eprintln!("Usage: stagehand -<level>   (level is a digit 0..=5)");
    ExitCode::FAILURE
}

fn print_help() {
    println!(
        r#"stagehand v{}

Pipeline worker: copies stdin to stdout after enforcing the
contract for the requested level.

  -0  copy only; open descriptors reported but not fatal
  -1  no descriptors open beyond stderr
  -2  level 1 plus badge/PATH/HOME checks; emits a checkpoint line
  -3  level 2 checks plus checkpoint handshake and stowaway check
  -4  exact environment plus lenient checkpoint handshake
  -5  refuse to run

Usage: stagehand -<level>"#,
        env!("CARGO_PKG_VERSION")
    );
}
