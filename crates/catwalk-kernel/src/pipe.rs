//! Owned pipe endpoints and the descriptor table stages are wired from.
//!
//! Every descriptor in play during the fork loop lives in one [`FdTable`]:
//! the N−1 pipe pairs plus the input and output file. Ownership rules:
//!
//! - Each descriptor is closed exactly once. In the parent that close is the
//!   `OwnedFd` drop after the fork loop. In a child it is the raw
//!   [`FdTable::close_unused`] sweep before exec; the child never returns,
//!   so its `OwnedFd` drops never run.
//! - A child that holds on to a write end it does not own keeps the pipe
//!   open from the kernel's perspective and the downstream reader never
//!   sees EOF. The sweep is a correctness requirement, not cleanup hygiene.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use catwalk_types::{SetupError, StageInput, StageOutput};
use nix::fcntl::OFlag;

/// Both ends of one anonymous pipe.
#[derive(Debug)]
pub struct PipePair {
    /// Read end; becomes stdin of the downstream stage.
    pub read: OwnedFd,
    /// Write end; becomes stdout of the upstream stage.
    pub write: OwnedFd,
}

/// Create `n` pipes up front, failing fast. If any creation fails, the pairs
/// already created are closed (by drop) before the error is reported, so a
/// partial failure leaks nothing.
///
/// Ends are opened close-on-exec. A stage's stdin/stdout are `dup2`
/// copies, which shed the flag, so the flag only guards descriptors that
/// were never meant to survive an exec (including pipes created by other
/// threads of an embedding process between their own fork and exec).
pub fn create_pipes(n: usize) -> Result<Vec<PipePair>, SetupError> {
    let mut pairs = Vec::with_capacity(n);
    for _ in 0..n {
        let (read, write) =
            nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| SetupError::Pipe(e.into()))?;
        pairs.push(PipePair { read, write });
    }
    Ok(pairs)
}

/// Every descriptor a forked stage inherits from the orchestrator: the pipe
/// pairs plus the opened input and output files.
#[derive(Debug)]
pub struct FdTable {
    pipes: Vec<PipePair>,
    input: OwnedFd,
    output: OwnedFd,
}

impl FdTable {
    pub fn new(pipes: Vec<PipePair>, input: OwnedFd, output: OwnedFd) -> Self {
        Self {
            pipes,
            input,
            output,
        }
    }

    /// The descriptor a stage's stdin should be duplicated from.
    pub fn stdin_fd(&self, input: &StageInput) -> RawFd {
        match input {
            StageInput::File(_) => self.input.as_raw_fd(),
            StageInput::Pipe(i) => self.pipes[*i].read.as_raw_fd(),
        }
    }

    /// The descriptor a stage's stdout should be duplicated from.
    pub fn stdout_fd(&self, output: &StageOutput) -> RawFd {
        match output {
            StageOutput::File(_) => self.output.as_raw_fd(),
            StageOutput::Pipe(i) => self.pipes[*i].write.as_raw_fd(),
        }
    }

    /// Number of pipes in the table.
    pub fn pipe_count(&self) -> usize {
        self.pipes.len()
    }

    /// Close every tracked descriptor not named in `keep`, without consuming
    /// the table. Allocation-free: safe between fork and exec.
    ///
    /// Child-side only, after dup2: the child exits via exec or
    /// `process::exit`, so the `OwnedFd` destructors never observe the
    /// already-closed descriptors. The parent closes its copies by dropping
    /// the table instead.
    pub fn close_unused(&self, keep: &[RawFd]) {
        let mut close_fd = |fd: RawFd| {
            if !keep.contains(&fd) {
                let _ = nix::unistd::close(fd);
            }
        };
        for pair in &self.pipes {
            close_fd(pair.read.as_raw_fd());
            close_fd(pair.write.as_raw_fd());
        }
        close_fd(self.input.as_raw_fd());
        close_fd(self.output.as_raw_fd());
    }
}
