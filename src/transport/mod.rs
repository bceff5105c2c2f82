//! Transport abstractions consumed by the execution engine
//!
//! The executor, sequencer and workflows only talk to these traits. The
//! russh-backed implementations live in [`crate::ssh`]; scripted in-memory
//! doubles live in [`mock`].

pub mod mock;

use async_trait::async_trait;

use crate::error::TransportError;

/// An authenticated remote-shell session.
///
/// Channels opened from one session are expected to be used one at a time.
#[async_trait]
pub trait TransportSession: Send + Sync {
    type Channel: CommandChannel;
    type Files: FileTransport;

    /// Open a new command channel with a pseudo-terminal attached
    async fn open_pty_channel(&self) -> Result<Self::Channel, TransportError>;

    /// Open the file-transfer sub-channel
    async fn open_file_transport(&self) -> Result<Self::Files, TransportError>;
}

/// A single command channel.
///
/// All `recv_*` and readiness calls are non-blocking: they report what has
/// already arrived and never wait for more.
#[async_trait]
pub trait CommandChannel: Send {
    /// Start `command` on the remote side
    async fn exec(&mut self, command: &str) -> Result<(), TransportError>;

    /// Write bytes to the command's input stream
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Force delivery of previously written bytes
    async fn flush(&mut self) -> Result<(), TransportError>;

    async fn stdout_ready(&mut self) -> Result<bool, TransportError>;

    async fn stderr_ready(&mut self) -> Result<bool, TransportError>;

    /// Take up to `max` buffered stdout bytes; empty when nothing is buffered
    async fn recv_stdout(&mut self, max: usize) -> Result<Vec<u8>, TransportError>;

    /// Take up to `max` buffered stderr bytes; empty when nothing is buffered
    async fn recv_stderr(&mut self, max: usize) -> Result<Vec<u8>, TransportError>;

    /// Whether the remote side has finished (exit status reported or channel closed)
    async fn exit_status_ready(&mut self) -> Result<bool, TransportError>;

    /// The reported exit status; errors when none is available
    async fn exit_status(&mut self) -> Result<i32, TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Whole-file text access on the remote host
#[async_trait]
pub trait FileTransport: Send {
    /// Read a remote file as text; `FileNotFound` when it does not exist
    async fn read_text(&mut self, path: &str) -> Result<String, TransportError>;

    /// Replace a remote file's contents with `text`
    async fn write_text(&mut self, path: &str, text: &str) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}
