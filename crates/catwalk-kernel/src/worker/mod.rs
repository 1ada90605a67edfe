//! The worker contract checker — what every spawned stage execs into.
//!
//! A worker is a state machine entered once at startup with its contract
//! level:
//!
//! - **0**: no checks, byte copy
//! - **1**: descriptor-leak check, then copy
//! - **2**: leak check + badge/path/home credentials, emit checkpoint, copy
//! - **3**: leak check + stowaway absent + strict checkpoint strip, copy
//! - **4**: leak check + sealed environment + badge + lenient checkpoint
//!   strip, copy
//! - **5**: refuse unconditionally
//!
//! A worker that fails a check still drains its input before exiting, so an
//! upstream writer is never left blocked on a full pipe. Each passed check
//! drops a zero-length marker file for the external test harness; marker
//! failures are logged and never change the exit code.

pub mod checks;

use std::collections::BTreeMap;
use std::io::{self, BufRead, Read, Write};
use std::os::fd::RawFd;
use std::path::PathBuf;

use catwalk_types::{
    checkpoint_line, parse_checkpoint, Check, ContractLevel, ContractViolation, EXPECT_HOME_VAR,
    EXPECT_PATH_VAR, HOME_VAR,
};

pub use checks::{open_descriptors_above_stderr, passwd_home, DEFAULT_FD_PROBE_BOUND};

/// Copy chunk size. Flushed per chunk so downstream stages see bytes as
/// they are consumed, not at exit.
const COPY_BUF: usize = 8 * 1024;

/// Everything a worker needs to know besides its environment snapshot.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// The contract level this worker runs under.
    pub level: ContractLevel,
    /// Whether a mismatched first line is still forwarded downstream.
    /// Stripping it instead would silently lose a line of pipeline data,
    /// so forwarding is the default.
    pub forward_on_mismatch: bool,
    /// Pre-supplied exact reference for the PATH check, if any.
    pub expected_path: Option<String>,
    /// Pre-supplied exact reference for the HOME check, if any.
    pub expected_home: Option<String>,
    /// Home directory from the passwd entry for the effective uid; the
    /// fallback expectation when no reference was pre-supplied.
    pub passwd_home: Option<String>,
    /// Where passed-check marker files are created; `None` disables them.
    pub marker_dir: Option<PathBuf>,
    /// Highest descriptor number the leak probe inspects.
    pub fd_probe_bound: RawFd,
}

impl WorkerConfig {
    /// A config with no process-derived state, for embedding and tests.
    pub fn new(level: ContractLevel) -> Self {
        Self {
            level,
            forward_on_mismatch: true,
            expected_path: None,
            expected_home: None,
            passwd_home: None,
            marker_dir: None,
            fd_probe_bound: DEFAULT_FD_PROBE_BOUND,
        }
    }

    /// The config the `stagehand` binary runs with: references from the
    /// optional `CATWALK_EXPECT_*` variables, the passwd home for the
    /// effective uid, markers in the current directory.
    pub fn from_process(level: ContractLevel) -> Self {
        Self {
            expected_path: std::env::var(EXPECT_PATH_VAR).ok(),
            expected_home: std::env::var(EXPECT_HOME_VAR).ok(),
            passwd_home: passwd_home(),
            marker_dir: std::env::current_dir().ok(),
            ..Self::new(level)
        }
    }
}

/// One worker run: checks against a fixed environment snapshot, then the
/// pass-through copy.
pub struct Worker {
    cfg: WorkerConfig,
    env: BTreeMap<String, String>,
    violations: Vec<ContractViolation>,
}

impl Worker {
    pub fn new(cfg: WorkerConfig, env: BTreeMap<String, String>) -> Self {
        Self {
            cfg,
            env,
            violations: Vec::new(),
        }
    }

    /// A worker over the real process environment.
    pub fn from_process(level: ContractLevel) -> Self {
        Self::new(WorkerConfig::from_process(level), std::env::vars().collect())
    }

    /// Run the contract and the copy. Returns the process exit code: 0 iff
    /// every applicable check passed and the copy completed. One diagnostic
    /// line per distinct failing check goes to `diag`.
    pub fn run(
        mut self,
        mut input: impl BufRead,
        mut output: impl Write,
        mut diag: impl Write,
    ) -> i32 {
        if self.cfg.level == ContractLevel::Refuse {
            self.violations.push(ContractViolation::Refused);
            return self.finish(Ok(()), &mut diag);
        }
        self.check_descriptors();
        self.check_environment();
        let io_result = self.transfer(&mut input, &mut output);
        self.finish(io_result, &mut diag)
    }

    fn finish(&self, io_result: io::Result<()>, diag: &mut impl Write) -> i32 {
        for violation in &self.violations {
            let _ = writeln!(diag, "stagehand: {violation}");
        }
        if let Err(e) = io_result {
            let _ = writeln!(diag, "stagehand: copy failed: {e}");
            return 1;
        }
        if self.violations.is_empty() {
            0
        } else {
            1
        }
    }

    fn check_descriptors(&mut self) {
        let open = checks::open_descriptors_above_stderr(self.cfg.fd_probe_bound);
        if self.cfg.level == ContractLevel::Open {
            // advisory only at level 0
            if !open.is_empty() {
                tracing::warn!(fds = ?open, "descriptors open above stderr");
            }
            return;
        }
        if open.is_empty() {
            self.mark(Check::Descriptors);
        } else {
            self.violations.push(ContractViolation::DescriptorLeak(open));
        }
    }

    fn check_environment(&mut self) {
        match self.cfg.level {
            ContractLevel::Badged => {
                let home_expect = self.home_expectation();
                let path_home = home_expect
                    .clone()
                    .or_else(|| self.env.get(HOME_VAR).cloned());
                self.apply(Check::Badge, checks::badge(&self.env));
                self.apply(
                    Check::Path,
                    checks::path(
                        &self.env,
                        self.cfg.expected_path.as_deref(),
                        path_home.as_deref(),
                    ),
                );
                self.apply(Check::Home, checks::home(&self.env, home_expect.as_deref()));
            }
            ContractLevel::Handshake => {
                self.apply(Check::NoStowaway, checks::no_stowaway(&self.env));
            }
            ContractLevel::Sealed => {
                self.apply(Check::SealedEnv, checks::sealed_env(&self.env));
                self.apply(Check::Badge, checks::badge(&self.env));
            }
            _ => {}
        }
    }

    fn home_expectation(&self) -> Option<String> {
        self.cfg
            .expected_home
            .clone()
            .or_else(|| self.cfg.passwd_home.clone())
    }

    /// The handshake and copy phase. Credentials decide what flows: with a
    /// clean environment the worker forwards, otherwise it only drains.
    fn transfer(&mut self, input: &mut impl BufRead, output: &mut impl Write) -> io::Result<()> {
        let env_ok = self.violations.is_empty();
        let carry = match self.cfg.level {
            ContractLevel::Handshake => self.take_checkpoint(input, true)?,
            ContractLevel::Sealed => self.take_checkpoint(input, false)?,
            _ => None,
        };

        if !env_ok {
            return drain(input);
        }

        if self.cfg.level == ContractLevel::Badged {
            writeln!(output, "{}", checkpoint_line(self.cfg.level))?;
            output.flush()?;
        }
        if let Some(first) = carry {
            output.write_all(&first)?;
            output.flush()?;
        }
        // after a checkpoint mismatch the rest is still copied verbatim
        copy(input, output)
    }

    /// Read the first input line and match it against the checkpoint the
    /// immediately preceding stage would have emitted.
    ///
    /// `strict` (level 3) requires the checkpoint to be there. The lenient
    /// form (level 4) treats a non-checkpoint first line as ordinary data —
    /// its canonical upstream is a stripping stage that emits no checkpoint
    /// of its own.
    ///
    /// Returns the bytes to forward downstream, if any.
    fn take_checkpoint(
        &mut self,
        input: &mut impl BufRead,
        strict: bool,
    ) -> io::Result<Option<Vec<u8>>> {
        let expected = ContractLevel::from_digit(self.cfg.level.digit().saturating_sub(1))
            .map(checkpoint_line)
            .unwrap_or_default();

        let mut first = Vec::new();
        input.read_until(b'\n', &mut first)?;
        if first.is_empty() {
            if strict {
                self.violations
                    .push(ContractViolation::CheckpointAbsent { expected });
            }
            return Ok(None);
        }

        let body = first.strip_suffix(b"\n").unwrap_or(&first);
        if body == expected.as_bytes() {
            self.mark(Check::Handshake);
            return Ok(None); // stripped, not forwarded
        }

        let checkpoint_shaped = std::str::from_utf8(body)
            .ok()
            .and_then(parse_checkpoint)
            .is_some();
        if strict || checkpoint_shaped {
            self.violations.push(ContractViolation::CheckpointMismatch {
                expected,
                found: String::from_utf8_lossy(body).into_owned(),
            });
            if self.cfg.forward_on_mismatch {
                Ok(Some(first))
            } else {
                Ok(None)
            }
        } else {
            self.mark(Check::Handshake);
            Ok(Some(first))
        }
    }

    fn apply(&mut self, check: Check, result: Result<(), ContractViolation>) {
        match result {
            Ok(()) => self.mark(check),
            Err(violation) => self.violations.push(violation),
        }
    }

    /// Record a passed check as a zero-length marker file. Best-effort: the
    /// markers exist for an external harness, not for correctness.
    fn mark(&self, check: Check) {
        let Some(dir) = &self.cfg.marker_dir else {
            return;
        };
        let name = format!("stagehand-{}.{}", self.cfg.level.digit(), check.name());
        if let Err(e) = std::fs::File::create(dir.join(&name)) {
            tracing::warn!(marker = %name, error = %e, "could not create marker file");
        }
    }
}

/// Stream bytes input→output until EOF, flushing as consumed. This is the
/// pass-through copy: exact byte content, exact order.
fn copy(input: &mut impl Read, output: &mut impl Write) -> io::Result<()> {
    let mut buf = [0u8; COPY_BUF];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        output.write_all(&buf[..n])?;
        output.flush()?;
    }
}

/// Read input to EOF and discard it, so an upstream writer blocked on a
/// full pipe can finish and exit.
fn drain(input: &mut impl Read) -> io::Result<()> {
    let mut buf = [0u8; COPY_BUF];
    loop {
        match input.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
