//! Privileged command execution engine
//!
//! - [`executor`]: one command through `sudo` on a PTY channel, bounded by a timeout
//! - [`sequencer`]: ordered batches with stop-on-error semantics
//! - [`result`]: per-command results and batch policy

pub mod executor;
pub mod result;
pub mod sequencer;

pub use executor::{execute, PrivilegedExecutor};
pub use result::{BatchPolicy, CommandResult, ExecutionBatch, DEFAULT_COMMAND_TIMEOUT};
pub use sequencer::{run, split_commands, CommandSequencer};
