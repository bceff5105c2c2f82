//! Command results and batch policy
//!
//! Provides the `CommandResult` record produced for every executed command,
//! the `BatchPolicy` a batch runs under, and the `ExecutionBatch` that ties
//! the two together.

use std::time::Duration;

use serde::Serialize;

/// Default per-command timeout (30 seconds)
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one command executed on the remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// The command as given by the caller, before the sudo prefix
    pub command: String,

    /// Standard output, trimmed
    pub stdout: String,

    /// Standard error, trimmed
    pub stderr: String,

    /// Exit code, or [`CommandResult::NO_EXIT_STATUS`] when none was reported
    pub exit_code: i32,

    /// `exit_code == 0`
    pub ok: bool,

    /// The deadline passed before the remote side reported an exit status
    pub timed_out: bool,
}

impl CommandResult {
    /// Exit code recorded when the transport could not report a status
    pub const NO_EXIT_STATUS: i32 = -1;

    /// Create a result; output is trimmed and `ok` derived from `exit_code`
    pub fn new(
        command: impl Into<String>,
        stdout: impl AsRef<str>,
        stderr: impl AsRef<str>,
        exit_code: i32,
    ) -> Self {
        Self {
            command: command.into(),
            stdout: stdout.as_ref().trim().to_string(),
            stderr: stderr.as_ref().trim().to_string(),
            exit_code,
            ok: exit_code == 0,
            timed_out: false,
        }
    }

    /// Build a result from raw channel bytes.
    ///
    /// Invalid UTF-8 is replaced with U+FFFD rather than rejected.
    pub fn from_bytes(
        command: impl Into<String>,
        stdout: &[u8],
        stderr: &[u8],
        exit_code: i32,
    ) -> Self {
        Self::new(
            command,
            String::from_utf8_lossy(stdout),
            String::from_utf8_lossy(stderr),
            exit_code,
        )
    }

    /// Mark the result as produced after the deadline passed
    pub fn with_timed_out(mut self, timed_out: bool) -> Self {
        self.timed_out = timed_out;
        self
    }
}

/// Policy a command batch runs under.
///
/// The two constructors carry deliberately different `stop_on_error`
/// defaults: [`BatchPolicy::sequence`] for scripted sequences and
/// [`BatchPolicy::interactive`] for operator-driven batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Stop at the first command with a non-zero exit code
    pub stop_on_error: bool,

    /// Time budget for each command
    pub timeout: Duration,
}

impl BatchPolicy {
    /// Scripted sequence: stop on the first failure, 30s per command
    pub fn sequence() -> Self {
        Self {
            stop_on_error: true,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Interactive batch: run every command regardless of failures, 30s per command
    pub fn interactive() -> Self {
        Self {
            stop_on_error: false,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Override the per-command timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override stop-on-error
    pub fn with_stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::sequence()
    }
}

/// Ordered results of one batch together with the policy that produced them
#[derive(Debug, Clone)]
pub struct ExecutionBatch {
    policy: BatchPolicy,
    results: Vec<CommandResult>,
}

impl ExecutionBatch {
    pub(crate) fn new(policy: BatchPolicy, results: Vec<CommandResult>) -> Self {
        Self { policy, results }
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    pub fn results(&self) -> &[CommandResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<CommandResult> {
        self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// True when every command exited 0
    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|r| r.ok)
    }

    /// Results with a non-zero (or missing) exit code
    pub fn failures(&self) -> impl Iterator<Item = &CommandResult> {
        self.results.iter().filter(|r| !r.ok)
    }
}
