//! catwalk-kernel: The core of catwalk.
//!
//! This crate provides:
//!
//! - **Pipe**: Owned pipe endpoints and the descriptor table a stage is
//!   wired from, with a close-exactly-once discipline
//! - **Envpolicy**: Per-stage environment resolution — a pure function from
//!   the inherited environment to the environment a stage execs with
//! - **Orchestrator**: Pipe creation, the fork loop, stream rewiring, exec,
//!   wait, and result aggregation
//! - **Worker**: The contract checker each spawned stage execs into —
//!   descriptor-leak check, credential checks, checkpoint handshake, and
//!   the pass-through byte copy
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Pipeline::run                         │
//! │  input ──▶ [stage 0] ──pipe──▶ [stage 1] ──pipe──▶ [stage 2] ──▶ output
//! │             fork+exec           fork+exec           fork+exec │
//! │  parent: closes every pipe end, waits, aggregates statuses   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod envpolicy;
pub mod orchestrator;
pub mod pipe;
pub mod worker;

pub use envpolicy::{default_path, EnvMode, EnvPolicy};
pub use orchestrator::Pipeline;
pub use pipe::{create_pipes, FdTable, PipePair};
pub use worker::{passwd_home, Worker, WorkerConfig};
