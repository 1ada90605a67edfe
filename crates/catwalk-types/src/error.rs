//! Error taxonomy — fatal orchestrator setup errors and per-worker contract
//! violations.
//!
//! `SetupError` is fatal: the pipeline was never fully constructed, so the
//! orchestrator reaps whatever it already forked and aborts. A
//! `ContractViolation` is local to one worker: its `Display` text becomes
//! the single diagnostic line that check writes to stderr before the worker
//! exits nonzero.

use std::path::PathBuf;

use thiserror::Error;

/// A failure before the pipeline was fully constructed. Always fatal.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot open input file {path:?}: {source}")]
    InputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create output file {path:?}: {source}")]
    OutputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pipe creation failed: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("fork failed for stage {stage}: {source}")]
    Fork {
        stage: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("exec of {worker:?} failed: {source}")]
    Exec {
        worker: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stream rewiring failed: {0}")]
    Wire(#[source] std::io::Error),

    #[error("wait for stage {stage} failed: {source}")]
    Wait {
        stage: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode {what} for exec: embedded NUL byte")]
    BadEncoding { what: String },

    #[error("a pipeline needs at least one stage")]
    NoStages,
}

/// A worker-detected breach of its contract. One diagnostic line per
/// distinct violation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractViolation {
    #[error("descriptor leak: fds {0:?} open above stderr")]
    DescriptorLeak(Vec<i32>),

    #[error("badge variable {var} is not set")]
    BadgeMissing { var: String },

    #[error("badge variable {var} is {found:?}, expected {expected:?}")]
    BadgeWrong {
        var: String,
        found: String,
        expected: String,
    },

    #[error("path variable {var} is not set")]
    PathMissing { var: String },

    #[error("path variable {var} is {found:?}, expected {expected:?}")]
    PathWrong {
        var: String,
        found: String,
        expected: String,
    },

    #[error("path variable {var} ({found:?}) does not contain the home directory {home:?}")]
    PathLacksHome {
        var: String,
        found: String,
        home: String,
    },

    #[error("home variable {var} is not set")]
    HomeMissing { var: String },

    #[error("home variable {var} is {found:?}, expected {expected:?}")]
    HomeWrong {
        var: String,
        found: String,
        expected: String,
    },

    #[error("stowaway variable {var} must not be set")]
    Stowaway { var: String },

    #[error("environment is not the sealed set: unexpected {extra:?}, missing {missing:?}")]
    NotSealed {
        extra: Vec<String>,
        missing: Vec<String>,
    },

    #[error("expected checkpoint {expected:?} but input starts with {found:?}")]
    CheckpointMismatch { expected: String, found: String },

    #[error("expected checkpoint {expected:?} but input is empty")]
    CheckpointAbsent { expected: String },

    #[error("contract level 5 refuses all work")]
    Refused,
}
