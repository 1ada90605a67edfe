//! Pure data types for catwalk — stage specs, contract levels, reports.
//!
//! This crate is a leaf dependency with no process spawning, no I/O, and no
//! unix-specific deps. It exists so that consumers (test harnesses, external
//! tooling) can work with catwalk's type system without pulling in the
//! kernel's fork/exec machinery.

pub mod contract;
pub mod error;
pub mod report;
pub mod stage;

// Flat re-exports for convenience
pub use contract::*;
pub use error::*;
pub use report::*;
pub use stage::*;
