//! Scripted in-memory transport for tests.
//!
//! A [`MockSession`] hands out one [`ScriptedChannel`] per queued
//! [`ScriptedCommand`]. Channel events are keyed to the time elapsed since
//! `exec`, measured with `tokio::time::Instant`, so tests running with paused
//! time are fully deterministic.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CommandChannel, FileTransport, TransportSession};
use crate::error::TransportError;

#[derive(Debug, Clone)]
enum Event {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit(i32),
    Error(String),
}

/// Script for a single command channel
#[derive(Debug, Clone, Default)]
pub struct ScriptedCommand {
    events: Vec<(Duration, Event)>,
    after_exit_stdout: Vec<u8>,
    after_exit_stderr: Vec<u8>,
    open_error: Option<String>,
    endless_stdout: Option<Vec<u8>>,
}

impl ScriptedCommand {
    /// A command that never produces output nor exits
    pub fn new() -> Self {
        Self::default()
    }

    /// A command that exits immediately with `code`
    pub fn exits(code: i32) -> Self {
        Self::new().exit_at(Duration::ZERO, code)
    }

    /// Opening the channel for this command fails
    pub fn fail_open(msg: impl Into<String>) -> Self {
        Self {
            open_error: Some(msg.into()),
            ..Self::default()
        }
    }

    pub fn stdout(self, data: impl AsRef<[u8]>) -> Self {
        self.stdout_at(Duration::ZERO, data)
    }

    pub fn stderr(self, data: impl AsRef<[u8]>) -> Self {
        self.stderr_at(Duration::ZERO, data)
    }

    pub fn stdout_at(mut self, at: Duration, data: impl AsRef<[u8]>) -> Self {
        self.events
            .push((at, Event::Stdout(data.as_ref().to_vec())));
        self
    }

    pub fn stderr_at(mut self, at: Duration, data: impl AsRef<[u8]>) -> Self {
        self.events
            .push((at, Event::Stderr(data.as_ref().to_vec())));
        self
    }

    pub fn exit_at(mut self, at: Duration, code: i32) -> Self {
        self.events.push((at, Event::Exit(code)));
        self
    }

    /// The channel reports a session error once `at` has elapsed
    pub fn error_at(mut self, at: Duration, msg: impl Into<String>) -> Self {
        self.events.push((at, Event::Error(msg.into())));
        self
    }

    /// Stdout that is never exhausted: `data` again every time the buffer empties
    pub fn endless_stdout(mut self, data: impl AsRef<[u8]>) -> Self {
        self.endless_stdout = Some(data.as_ref().to_vec());
        self
    }

    /// Stdout that only becomes readable after the exit status was observed
    pub fn stdout_after_exit(mut self, data: impl AsRef<[u8]>) -> Self {
        self.after_exit_stdout.extend_from_slice(data.as_ref());
        self
    }

    /// Stderr that only becomes readable after the exit status was observed
    pub fn stderr_after_exit(mut self, data: impl AsRef<[u8]>) -> Self {
        self.after_exit_stderr.extend_from_slice(data.as_ref());
        self
    }
}

/// What a test can observe about a channel after the fact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelLog {
    /// Command passed to `exec`
    pub command: Option<String>,
    /// Every byte written to the input stream
    pub input: Vec<u8>,
    pub flushes: usize,
    pub closed: bool,
}

/// Channel replaying a [`ScriptedCommand`]
pub struct ScriptedChannel {
    events: Vec<(Duration, Event)>,
    next_event: usize,
    after_exit_stdout: Vec<u8>,
    after_exit_stderr: Vec<u8>,
    endless_stdout: Option<Vec<u8>>,
    started: Option<Instant>,
    stdout: VecDeque<u8>,
    stderr: VecDeque<u8>,
    exit_code: Option<i32>,
    exit_observed: bool,
    log: Arc<Mutex<ChannelLog>>,
}

#[allow(clippy::expect_used)]
impl ScriptedChannel {
    fn new(script: ScriptedCommand, log: Arc<Mutex<ChannelLog>>) -> Self {
        let mut events = script.events;
        events.sort_by_key(|(at, _)| *at);
        Self {
            events,
            next_event: 0,
            after_exit_stdout: script.after_exit_stdout,
            after_exit_stderr: script.after_exit_stderr,
            endless_stdout: script.endless_stdout,
            started: None,
            stdout: VecDeque::new(),
            stderr: VecDeque::new(),
            exit_code: None,
            exit_observed: false,
            log,
        }
    }

    /// Release every event whose time has come
    fn pump(&mut self) -> Result<(), TransportError> {
        let Some(started) = self.started else {
            return Ok(());
        };
        let elapsed = started.elapsed();

        if let Some(ref data) = self.endless_stdout {
            if self.stdout.is_empty() {
                self.stdout.extend(data.iter().copied());
            }
        }

        while let Some((at, event)) = self.events.get(self.next_event) {
            if *at > elapsed {
                break;
            }
            let event = event.clone();
            self.next_event += 1;
            match event {
                Event::Stdout(data) => self.stdout.extend(data),
                Event::Stderr(data) => self.stderr.extend(data),
                Event::Exit(code) => self.exit_code = Some(code),
                Event::Error(msg) => return Err(TransportError::session(msg)),
            }
        }
        Ok(())
    }

    fn take(buffer: &mut VecDeque<u8>, max: usize) -> Vec<u8> {
        let n = max.min(buffer.len());
        buffer.drain(..n).collect()
    }
}

#[allow(clippy::expect_used)]
#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        self.log.lock().expect("lock poisoned").command = Some(command.to_string());
        self.started = Some(Instant::now());
        self.pump()
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.log
            .lock()
            .expect("lock poisoned")
            .input
            .extend_from_slice(data);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.log.lock().expect("lock poisoned").flushes += 1;
        Ok(())
    }

    async fn stdout_ready(&mut self) -> Result<bool, TransportError> {
        self.pump()?;
        Ok(!self.stdout.is_empty())
    }

    async fn stderr_ready(&mut self) -> Result<bool, TransportError> {
        self.pump()?;
        Ok(!self.stderr.is_empty())
    }

    async fn recv_stdout(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        self.pump()?;
        Ok(Self::take(&mut self.stdout, max))
    }

    async fn recv_stderr(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        self.pump()?;
        Ok(Self::take(&mut self.stderr, max))
    }

    async fn exit_status_ready(&mut self) -> Result<bool, TransportError> {
        self.pump()?;
        if self.exit_code.is_none() {
            return Ok(false);
        }
        if !self.exit_observed {
            self.exit_observed = true;
            self.stdout.extend(self.after_exit_stdout.drain(..));
            self.stderr.extend(self.after_exit_stderr.drain(..));
        }
        Ok(true)
    }

    async fn exit_status(&mut self) -> Result<i32, TransportError> {
        self.pump()?;
        self.exit_code
            .ok_or_else(|| TransportError::session("no exit status reported"))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.log.lock().expect("lock poisoned").closed = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MockFiles {
    contents: HashMap<String, String>,
    writes: usize,
    opened: usize,
    closed: usize,
    write_error: Option<String>,
}

/// In-memory session for unit tests.
///
/// Tracks every channel it handed out and every file transport opened, for
/// assertions.
#[derive(Default)]
pub struct MockSession {
    commands: Mutex<VecDeque<ScriptedCommand>>,
    channels: Mutex<Vec<Arc<Mutex<ChannelLog>>>>,
    files: Arc<Mutex<MockFiles>>,
}

#[allow(clippy::expect_used)]
impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue scripts; each `open_pty_channel` consumes the next one
    pub fn with_commands(commands: impl IntoIterator<Item = ScriptedCommand>) -> Self {
        let session = Self::new();
        session
            .commands
            .lock()
            .expect("lock poisoned")
            .extend(commands);
        session
    }

    pub fn with_file(self, path: impl Into<String>, text: impl Into<String>) -> Self {
        self.files
            .lock()
            .expect("lock poisoned")
            .contents
            .insert(path.into(), text.into());
        self
    }

    /// Make every `write_text` fail with an I/O error
    pub fn fail_file_writes(self, msg: impl Into<String>) -> Self {
        self.files.lock().expect("lock poisoned").write_error = Some(msg.into());
        self
    }

    /// Snapshot of every channel opened so far, in order
    pub fn channel_logs(&self) -> Vec<ChannelLog> {
        self.channels
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|log| log.lock().expect("lock poisoned").clone())
            .collect()
    }

    /// Commands passed to `exec`, in order
    pub fn executed_commands(&self) -> Vec<String> {
        self.channel_logs()
            .into_iter()
            .filter_map(|log| log.command)
            .collect()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .expect("lock poisoned")
            .contents
            .get(path)
            .cloned()
    }

    pub fn file_writes(&self) -> usize {
        self.files.lock().expect("lock poisoned").writes
    }

    /// File transports opened but not yet closed
    pub fn open_file_transports(&self) -> usize {
        let files = self.files.lock().expect("lock poisoned");
        files.opened - files.closed
    }
}

#[allow(clippy::expect_used)]
#[async_trait]
impl TransportSession for MockSession {
    type Channel = ScriptedChannel;
    type Files = MockFileTransport;

    async fn open_pty_channel(&self) -> Result<ScriptedChannel, TransportError> {
        let script = self
            .commands
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .ok_or_else(|| TransportError::channel_open("no scripted command left"))?;

        if let Some(msg) = script.open_error.clone() {
            return Err(TransportError::channel_open(msg));
        }

        let log = Arc::new(Mutex::new(ChannelLog::default()));
        self.channels
            .lock()
            .expect("lock poisoned")
            .push(log.clone());
        Ok(ScriptedChannel::new(script, log))
    }

    async fn open_file_transport(&self) -> Result<MockFileTransport, TransportError> {
        self.files.lock().expect("lock poisoned").opened += 1;
        Ok(MockFileTransport {
            files: self.files.clone(),
            closed: false,
        })
    }
}

/// File transport backed by the owning [`MockSession`]'s file map
pub struct MockFileTransport {
    files: Arc<Mutex<MockFiles>>,
    closed: bool,
}

#[allow(clippy::expect_used)]
#[async_trait]
impl FileTransport for MockFileTransport {
    async fn read_text(&mut self, path: &str) -> Result<String, TransportError> {
        self.files
            .lock()
            .expect("lock poisoned")
            .contents
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::FileNotFound {
                path: path.to_string(),
            })
    }

    async fn write_text(&mut self, path: &str, text: &str) -> Result<(), TransportError> {
        let mut files = self.files.lock().expect("lock poisoned");
        if let Some(msg) = files.write_error.clone() {
            return Err(TransportError::file_io(path, msg));
        }
        files.writes += 1;
        files.contents.insert(path.to_string(), text.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.files.lock().expect("lock poisoned").closed += 1;
        }
        Ok(())
    }
}
