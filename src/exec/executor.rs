//! Privileged command execution over a PTY channel
//!
//! The remote command runs as `sudo -S -p '' <command>`. The password is
//! written to the channel's input once, right after the command starts, and
//! the channel is then polled until it reports an exit status or the
//! per-command deadline passes.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::result::CommandResult;
use crate::error::TransportError;
use crate::ssh::elevation::{password_line, wrap_sudo_command};
use crate::transport::{CommandChannel, TransportSession};

/// Sleep between polls when nothing arrived
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum bytes taken from a stream per read
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Executes single commands on a [`TransportSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivilegedExecutor {
    poll_interval: Duration,
    chunk_size: usize,
}

impl Default for PrivilegedExecutor {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PrivilegedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Run `command` with sudo and harvest its output.
    ///
    /// A non-zero exit is reported in the returned [`CommandResult`], never
    /// as an error. Errors are reserved for the channel failing to open or
    /// the session failing mid-command.
    ///
    /// The password is delivered without waiting for a prompt: the remote
    /// program must read it before anything else from its input.
    pub async fn execute<S>(
        &self,
        session: &S,
        command: &str,
        elevation_password: &str,
        timeout: Duration,
    ) -> Result<CommandResult, TransportError>
    where
        S: TransportSession + ?Sized,
    {
        let mut channel = session.open_pty_channel().await?;
        let result = self
            .run_elevated(&mut channel, command, elevation_password, timeout)
            .await;
        close_quietly(&mut channel).await;
        result
    }

    /// Run `command` as the login user, without sudo
    pub async fn execute_plain<S>(
        &self,
        session: &S,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, TransportError>
    where
        S: TransportSession + ?Sized,
    {
        let mut channel = session.open_pty_channel().await?;
        let result: Result<CommandResult, TransportError> = async {
            channel.exec(command).await?;
            self.harvest(&mut channel, command, timeout).await
        }
        .await;
        close_quietly(&mut channel).await;
        result
    }

    async fn run_elevated<C>(
        &self,
        channel: &mut C,
        command: &str,
        elevation_password: &str,
        timeout: Duration,
    ) -> Result<CommandResult, TransportError>
    where
        C: CommandChannel + ?Sized,
    {
        let remote_command = wrap_sudo_command(command);
        debug!("Executing: {}", remote_command);
        channel.exec(&remote_command).await?;

        channel.write(&password_line(elevation_password)).await?;
        channel.flush().await?;

        let mut result = self.harvest(channel, command, timeout).await?;
        result.stdout = strip_echoed_password(result.stdout, elevation_password);
        Ok(result)
    }

    /// Poll the channel until exit status or deadline, then drain once more
    async fn harvest<C>(
        &self,
        channel: &mut C,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResult, TransportError>
    where
        C: CommandChannel + ?Sized,
    {
        let deadline = Instant::now() + timeout;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut timed_out = false;

        loop {
            let got_stdout = self
                .drain(channel, Stream::Stdout, &mut stdout, deadline)
                .await?;
            let got_stderr = self
                .drain(channel, Stream::Stderr, &mut stderr, deadline)
                .await?;

            if channel.exit_status_ready().await? {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                timed_out = true;
                warn!(
                    "Command '{}' did not finish within {}ms, returning partial output",
                    command,
                    timeout.as_millis()
                );
                break;
            }

            if !got_stdout && !got_stderr {
                sleep(self.poll_interval.min(deadline - now)).await;
            }
        }

        // Output can still be buffered after the exit status arrives. Past the
        // deadline this takes at most one chunk per stream.
        let until = Instant::now().max(deadline);
        self.drain(channel, Stream::Stdout, &mut stdout, until)
            .await?;
        self.drain(channel, Stream::Stderr, &mut stderr, until)
            .await?;

        let exit_code = match channel.exit_status().await {
            Ok(code) => code,
            Err(e) => {
                debug!("No exit status for '{}': {}", command, e);
                CommandResult::NO_EXIT_STATUS
            }
        };

        debug!(
            "Command completed: exit_code={}, stdout_len={}, stderr_len={}",
            exit_code,
            stdout.len(),
            stderr.len()
        );

        Ok(CommandResult::from_bytes(command, &stdout, &stderr, exit_code)
            .with_timed_out(timed_out))
    }

    /// Move what is currently buffered on `stream` into `sink`.
    ///
    /// Stops once the stream has nothing ready, or after the first chunk read
    /// at or past `until`, so a stream that never runs dry cannot hold the
    /// caller past its deadline. Returns whether any byte was read.
    async fn drain<C>(
        &self,
        channel: &mut C,
        stream: Stream,
        sink: &mut Vec<u8>,
        until: Instant,
    ) -> Result<bool, TransportError>
    where
        C: CommandChannel + ?Sized,
    {
        let mut read_any = false;
        loop {
            let ready = match stream {
                Stream::Stdout => channel.stdout_ready().await?,
                Stream::Stderr => channel.stderr_ready().await?,
            };
            if !ready {
                break;
            }

            let chunk = match stream {
                Stream::Stdout => channel.recv_stdout(self.chunk_size).await?,
                Stream::Stderr => channel.recv_stderr(self.chunk_size).await?,
            };
            if chunk.is_empty() {
                break;
            }
            sink.extend_from_slice(&chunk);
            read_any = true;

            if Instant::now() >= until {
                break;
            }
        }
        Ok(read_any)
    }
}

/// Drop a leading copy of the password from terminal echo
fn strip_echoed_password(stdout: String, password: &str) -> String {
    let password = password.trim();
    if password.is_empty() {
        return stdout;
    }
    match stdout.split_once('\n') {
        Some((first, rest)) if first.trim() == password => rest.trim_start().to_string(),
        None if stdout.trim() == password => String::new(),
        _ => stdout,
    }
}

async fn close_quietly<C>(channel: &mut C)
where
    C: CommandChannel + ?Sized,
{
    if let Err(e) = channel.close().await {
        debug!("Failed to close channel: {}", e);
    }
}

/// Run `command` with sudo using the default poll settings
pub async fn execute<S>(
    session: &S,
    command: &str,
    elevation_password: &str,
    timeout: Duration,
) -> Result<CommandResult, TransportError>
where
    S: TransportSession + ?Sized,
{
    PrivilegedExecutor::default()
        .execute(session, command, elevation_password, timeout)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{MockSession, ScriptedCommand};

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_execute_success() {
        let session = MockSession::with_commands([ScriptedCommand::new()
            .stdout_at(Duration::from_millis(50), "uid=0(root)\n")
            .exit_at(Duration::from_millis(120), 0)]);

        let result = execute(&session, "id", "s3cret", SECOND * 5).await.unwrap();

        assert!(result.ok);
        assert!(!result.timed_out);
        assert_eq!(result.command, "id");
        assert_eq!(result.stdout, "uid=0(root)");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_wraps_command_and_sends_password_once() {
        let session = MockSession::with_commands([ScriptedCommand::exits(0)]);

        execute(&session, "systemctl restart oxidized", "pw", SECOND)
            .await
            .unwrap();

        let logs = session.channel_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(
            logs[0].command.as_deref(),
            Some("sudo -S -p '' systemctl restart oxidized")
        );
        assert_eq!(logs[0].input, b"pw\n".to_vec());
        assert_eq!(logs[0].flushes, 1);
        assert!(logs[0].closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_hides_echoed_password() {
        let session = MockSession::with_commands([ScriptedCommand::new()
            .stdout("s3cret\r\nuid=0(root) gid=0(root)\r\n")
            .exit_at(Duration::from_millis(20), 0)]);

        let result = execute(&session, "id", "s3cret", SECOND).await.unwrap();

        assert_eq!(result.stdout, "uid=0(root) gid=0(root)");
        assert!(!result.stdout.contains("s3cret"));
    }

    #[test]
    fn test_strip_echoed_password() {
        assert_eq!(strip_echoed_password("pw".to_string(), "pw"), "");
        assert_eq!(strip_echoed_password("pw\r\nok".to_string(), "pw"), "ok");
        assert_eq!(
            strip_echoed_password("pwd is /root\nok".to_string(), "pw"),
            "pwd is /root\nok"
        );
        assert_eq!(strip_echoed_password("\nok".to_string(), ""), "\nok");
    }

    #[tokio::test]
    async fn test_execute_endless_output_still_times_out() {
        let session = MockSession::with_commands([ScriptedCommand::new().endless_stdout("y\n")]);

        let started = std::time::Instant::now();
        let result = execute(&session, "yes", "pw", Duration::from_millis(200))
            .await
            .unwrap();

        assert!(started.elapsed() < SECOND * 5);
        assert!(result.timed_out);
        assert_eq!(result.exit_code, CommandResult::NO_EXIT_STATUS);
        assert!(result.stdout.starts_with("y\ny"));
        assert!(session.channel_logs()[0].closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_nonzero_exit_is_not_an_error() {
        let session = MockSession::with_commands([ScriptedCommand::new()
            .stderr("ls: cannot access '/nope': No such file or directory\n")
            .exit_at(Duration::from_millis(10), 1)]);

        let result = execute(&session, "ls /nope", "pw", SECOND).await.unwrap();

        assert!(!result.ok);
        assert_eq!(result.exit_code, 1);
        assert_eq!(
            result.stderr,
            "ls: cannot access '/nope': No such file or directory"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_timeout_returns_partial_output() {
        let session = MockSession::with_commands([ScriptedCommand::new()
            .stdout_at(Duration::from_millis(200), "partial line\n")]);

        let started = Instant::now();
        let result = execute(&session, "tail -f /var/log/syslog", "pw", SECOND)
            .await
            .unwrap();

        assert!(started.elapsed() >= SECOND);
        assert!(result.timed_out);
        assert!(!result.ok);
        assert_eq!(result.exit_code, CommandResult::NO_EXIT_STATUS);
        assert_eq!(result.stdout, "partial line");
        assert!(session.channel_logs()[0].closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_captures_output_after_exit_status() {
        let session = MockSession::with_commands([ScriptedCommand::new()
            .stdout("first\n")
            .exit_at(Duration::from_millis(300), 0)
            .stdout_after_exit("late\n")
            .stderr_after_exit("warning: late\n")]);

        let result = execute(&session, "cat f", "pw", SECOND).await.unwrap();

        assert_eq!(result.stdout, "first\nlate");
        assert_eq!(result.stderr, "warning: late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_reads_large_output_in_chunks() {
        let big = "x".repeat(10_000);
        let session = MockSession::with_commands([ScriptedCommand::new()
            .stdout(&big)
            .exit_at(Duration::from_millis(10), 0)]);

        let result = PrivilegedExecutor::new()
            .with_chunk_size(1024)
            .execute(&session, "cat big", "pw", SECOND)
            .await
            .unwrap();

        assert_eq!(result.stdout.len(), 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_replaces_invalid_utf8() {
        let session = MockSession::with_commands([ScriptedCommand::new()
            .stdout(b"caf\xe9\n")
            .exit_at(Duration::ZERO, 0)]);

        let result = execute(&session, "cat latin1.txt", "pw", SECOND)
            .await
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.stdout, "caf\u{fffd}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_channel_open_failure() {
        let session =
            MockSession::with_commands([ScriptedCommand::fail_open("administratively prohibited")]);

        let err = execute(&session, "id", "pw", SECOND).await.unwrap_err();

        assert!(matches!(err, TransportError::ChannelOpen(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_session_error_propagates_and_closes() {
        let session = MockSession::with_commands([ScriptedCommand::new()
            .stdout("starting\n")
            .error_at(Duration::from_millis(250), "connection reset")]);

        let err = execute(&session, "apt upgrade", "pw", SECOND * 10)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Session(ref msg) if msg == "connection reset"));
        assert!(session.channel_logs()[0].closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_plain_sends_no_password() {
        let session = MockSession::with_commands([ScriptedCommand::new()
            .stdout("SSH connection OK\n")
            .exit_at(Duration::ZERO, 0)]);

        let result = PrivilegedExecutor::new()
            .execute_plain(&session, "echo 'SSH connection OK'", SECOND)
            .await
            .unwrap();

        assert!(result.ok);
        let logs = session.channel_logs();
        assert_eq!(logs[0].command.as_deref(), Some("echo 'SSH connection OK'"));
        assert!(logs[0].input.is_empty());
    }
}
