//! Ordered command batches
//!
//! Commands run one at a time, in order, on a single session; later commands
//! may depend on what earlier ones changed on the host.

use tracing::{error, info, warn};

use super::executor::PrivilegedExecutor;
use super::result::{BatchPolicy, CommandResult, ExecutionBatch};
use crate::error::BatchError;
use crate::transport::TransportSession;

/// Split a rendered command block into commands.
///
/// One command per line; lines are trimmed and blank lines dropped.
pub fn split_commands(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Runs command lists through a [`PrivilegedExecutor`] under a [`BatchPolicy`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSequencer {
    executor: PrivilegedExecutor,
    policy: BatchPolicy,
}

impl CommandSequencer {
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            executor: PrivilegedExecutor::default(),
            policy,
        }
    }

    pub fn with_executor(mut self, executor: PrivilegedExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Execute `commands` in order.
    ///
    /// With `stop_on_error`, the first non-zero exit ends the batch with
    /// [`BatchError::CommandFailed`]. A transport failure always ends the
    /// batch with [`BatchError::Transport`]. Both carry the results collected
    /// so far.
    pub async fn run<S, C>(
        &self,
        session: &S,
        elevation_password: &str,
        commands: &[C],
    ) -> Result<ExecutionBatch, BatchError>
    where
        S: TransportSession + ?Sized,
        C: AsRef<str> + Sync,
    {
        let total = commands.len();
        let mut results: Vec<CommandResult> = Vec::with_capacity(total);

        for (index, command) in commands.iter().enumerate() {
            let command = command.as_ref();
            info!("[{}/{}] {}", index + 1, total, command);

            let result = match self
                .executor
                .execute(session, command, elevation_password, self.policy.timeout)
                .await
            {
                Ok(result) => result,
                Err(source) => {
                    error!("SSH error while executing '{}': {}", command, source);
                    return Err(BatchError::Transport {
                        command: command.to_string(),
                        source,
                        results,
                    });
                }
            };

            if result.timed_out {
                warn!(
                    "[{}/{}] timed out, output may be incomplete",
                    index + 1,
                    total
                );
            }

            if result.ok {
                info!("[{}/{}] ok", index + 1, total);
            } else {
                warn!(
                    "[{}/{}] failed with exit code {}",
                    index + 1,
                    total,
                    result.exit_code
                );
            }

            let failed = !result.ok;
            let exit_code = result.exit_code;
            let stderr = result.stderr.clone();
            results.push(result);

            if failed && self.policy.stop_on_error {
                return Err(BatchError::CommandFailed {
                    command: command.to_string(),
                    exit_code,
                    stderr,
                    results,
                });
            }
        }

        Ok(ExecutionBatch::new(self.policy, results))
    }
}

/// Execute `commands` with the default executor under `policy`
pub async fn run<S, C>(
    session: &S,
    elevation_password: &str,
    commands: &[C],
    policy: BatchPolicy,
) -> Result<ExecutionBatch, BatchError>
where
    S: TransportSession + ?Sized,
    C: AsRef<str> + Sync,
{
    CommandSequencer::new(policy)
        .run(session, elevation_password, commands)
        .await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::TransportError;
    use crate::transport::mock::{MockSession, ScriptedCommand};

    fn ok(stdout: &str) -> ScriptedCommand {
        ScriptedCommand::new()
            .stdout(stdout)
            .exit_at(Duration::from_millis(10), 0)
    }

    fn fail(stderr: &str, code: i32) -> ScriptedCommand {
        ScriptedCommand::new()
            .stderr(stderr)
            .exit_at(Duration::from_millis(10), code)
    }

    #[test]
    fn test_split_commands() {
        let block = "  show version  \n\n\tconfigure terminal\n   \nexit\n";
        assert_eq!(
            split_commands(block),
            vec!["show version", "configure terminal", "exit"]
        );
        assert!(split_commands("\n \n").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_continue_on_error_returns_every_result_in_order() {
        let session = MockSession::with_commands([ok("a"), fail("boom", 2), ok("c")]);
        let commands = ["cmd1", "cmd2", "cmd3"];

        let batch = run(&session, "pw", &commands, BatchPolicy::interactive())
            .await
            .unwrap();

        assert_eq!(batch.len(), commands.len());
        let names: Vec<_> = batch.results().iter().map(|r| r.command.as_str()).collect();
        assert_eq!(names, commands);
        assert!(!batch.all_ok());
        assert_eq!(batch.results()[1].exit_code, 2);
        assert!(!batch.policy().stop_on_error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stop_on_error_stops_after_failing_command() {
        let session = MockSession::with_commands([ok("a"), fail("denied", 1), ok("c")]);

        let err = run(
            &session,
            "pw",
            &["cmd1_ok", "cmd2_fail", "cmd3_ok"],
            BatchPolicy::sequence(),
        )
        .await
        .unwrap_err();

        match &err {
            BatchError::CommandFailed {
                command,
                exit_code,
                stderr,
                results,
            } => {
                assert_eq!(command, "cmd2_fail");
                assert_eq!(*exit_code, 1);
                assert_eq!(stderr, "denied");
                assert_eq!(results.len(), 2);
                assert!(results[0].ok);
                assert!(!results[1].ok);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.executed_commands().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stop_on_error_first_command_fails() {
        let session = MockSession::with_commands([fail("nope", 127), ok("never")]);

        let err = run(&session, "pw", &["missing-binary", "ls"], BatchPolicy::sequence())
            .await
            .unwrap_err();

        assert_eq!(err.results().len(), 1);
        assert_eq!(err.command(), "missing-binary");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_transport_error_aborts_regardless_of_policy() {
        let session = MockSession::with_commands([
            ok("a"),
            ScriptedCommand::fail_open("channel limit reached"),
            ok("c"),
        ]);

        let err = run(&session, "pw", &["one", "two", "three"], BatchPolicy::interactive())
            .await
            .unwrap_err();

        match err {
            BatchError::Transport {
                command,
                source,
                results,
            } => {
                assert_eq!(command, "two");
                assert!(matches!(source, TransportError::ChannelOpen(_)));
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].command, "one");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timed_out_command_counts_as_failure() {
        let session = MockSession::with_commands([
            ScriptedCommand::new().stdout("waiting..."),
            ok("after"),
        ]);
        let policy = BatchPolicy::sequence().with_timeout(Duration::from_secs(1));

        let err = run(&session, "pw", &["hang", "after"], policy)
            .await
            .unwrap_err();

        let results = err.into_results();
        assert_eq!(results.len(), 1);
        assert!(results[0].timed_out);
        assert_eq!(results[0].exit_code, CommandResult::NO_EXIT_STATUS);
        assert_eq!(results[0].stdout, "waiting...");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_empty_batch() {
        let session = MockSession::new();
        let commands: [&str; 0] = [];

        let batch = run(&session, "pw", &commands, BatchPolicy::sequence())
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert!(batch.all_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_accepts_split_block() {
        let session = MockSession::with_commands([ok("1"), ok("2")]);
        let commands = split_commands("mkdir -p /etc/oxidized\n\nchown oxidized /etc/oxidized\n");

        let batch = CommandSequencer::new(BatchPolicy::sequence())
            .run(&session, "pw", &commands)
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(
            session.executed_commands(),
            vec![
                "sudo -S -p '' mkdir -p /etc/oxidized",
                "sudo -S -p '' chown oxidized /etc/oxidized"
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_result_counts_for_every_failure_position() {
        for len in 1..=5usize {
            for fail_at in 0..len {
                let commands: Vec<String> = (0..len).map(|i| format!("step-{i}")).collect();
                let script = move |count: usize| {
                    (0..count).map(move |i| if i == fail_at { fail("no", 3) } else { ok("") })
                };

                let session = MockSession::with_commands(script(len));
                let err = run(&session, "pw", &commands, BatchPolicy::sequence())
                    .await
                    .unwrap_err();
                assert_eq!(err.results().len(), fail_at + 1, "len={len} fail_at={fail_at}");
                assert_eq!(err.command(), commands[fail_at]);
                assert_eq!(session.channel_logs().len(), fail_at + 1);

                let session = MockSession::with_commands(script(len));
                let batch = run(&session, "pw", &commands, BatchPolicy::interactive())
                    .await
                    .unwrap();
                assert_eq!(batch.len(), len);
                assert_eq!(batch.failures().count(), 1);
                let order: Vec<_> = batch.results().iter().map(|r| r.command.clone()).collect();
                assert_eq!(order, commands);
            }
        }
    }
}
