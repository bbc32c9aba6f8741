//! Execution control
//!
//! Runs one imperative host command at a time with explicit failure semantics.

pub mod executor;

pub use executor::{CommandExecutor, CommandOutput, CommandRunner, HostCommand};
