//! Stage identification — contract levels and per-stage wiring specs.

use std::path::PathBuf;

/// The validation profile a worker applies to its inherited environment and
/// descriptor table. Selected on the worker command line as a single digit
/// (`stagehand -3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ContractLevel {
    /// No checks. Plain byte copy; descriptor scan is advisory only.
    Open,
    /// Descriptor-leak check, then copy.
    Tidy,
    /// Descriptor-leak check plus badge/path/home credentials. Emits this
    /// stage's checkpoint line before copying.
    Badged,
    /// Descriptor-leak check, stowaway variable must be absent, and the
    /// first input line must be the upstream checkpoint (which is stripped).
    Handshake,
    /// Descriptor-leak check against a closed environment: exactly the
    /// allow-listed variables, badge correct, checkpoint stripped if present.
    Sealed,
    /// Unconditional failure. Reads nothing, writes nothing, exits nonzero.
    Refuse,
}

impl ContractLevel {
    /// All levels, in digit order.
    pub const ALL: [ContractLevel; 6] = [
        ContractLevel::Open,
        ContractLevel::Tidy,
        ContractLevel::Badged,
        ContractLevel::Handshake,
        ContractLevel::Sealed,
        ContractLevel::Refuse,
    ];

    /// Parse a level from its digit (0–5).
    pub fn from_digit(d: u8) -> Option<Self> {
        Self::ALL.get(d as usize).copied()
    }

    /// The digit this level is selected by on the worker command line.
    pub fn digit(&self) -> u8 {
        Self::ALL
            .iter()
            .position(|l| l == self)
            .map(|p| p as u8)
            .unwrap_or(0)
    }

    /// True if this level reaches the byte-copy phase when its checks pass.
    pub fn copies(&self) -> bool {
        !matches!(self, ContractLevel::Refuse)
    }
}

impl std::fmt::Display for ContractLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digit())
    }
}

/// Where a stage reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInput {
    /// The pipeline's external input file (stage 0 only).
    File(PathBuf),
    /// The read end of the numbered pipe.
    Pipe(usize),
}

/// Where a stage writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutput {
    /// The pipeline's external output file (last stage only).
    File(PathBuf),
    /// The write end of the numbered pipe.
    Pipe(usize),
}

/// Immutable description of one pipeline stage, fixed at orchestrator
/// startup: which contract the worker runs under and which endpoints its
/// standard streams are wired to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    /// Position in the pipeline, 0-based.
    pub index: usize,
    /// Contract level passed to the worker as `-<digit>`.
    pub level: ContractLevel,
    /// Source for the stage's stdin.
    pub input: StageInput,
    /// Sink for the stage's stdout.
    pub output: StageOutput,
}

impl StageSpec {
    /// Build the wiring plan for an `n`-stage pipeline over the given files:
    /// stage 0 reads the input file, the last stage writes the output file,
    /// and interior edges are the n−1 pipes.
    pub fn plan(
        levels: &[ContractLevel],
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Vec<StageSpec> {
        let n = levels.len();
        let input = input.into();
        let output = output.into();
        levels
            .iter()
            .enumerate()
            .map(|(i, &level)| StageSpec {
                index: i,
                level,
                input: if i == 0 {
                    StageInput::File(input.clone())
                } else {
                    StageInput::Pipe(i - 1)
                },
                output: if i + 1 == n {
                    StageOutput::File(output.clone())
                } else {
                    StageOutput::Pipe(i)
                },
            })
            .collect()
    }
}
