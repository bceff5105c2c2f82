//! russh-backed command channel
//!
//! russh delivers channel traffic as a stream of [`ChannelMsg`] values. This
//! wrapper pulls whatever messages are already queued, without waiting, and
//! keeps stdout, stderr and the exit status in local buffers so the executor
//! can treat the channel as a set of non-blocking streams.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::CommandChannel;

/// SSH extended-data type code for stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Output buffers and exit state built up from channel messages
#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    stdout: VecDeque<u8>,
    stderr: VecDeque<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
    eof: bool,
    closed: bool,
    /// The message stream ended without the server closing the channel
    dropped: bool,
}

impl ChannelState {
    pub(crate) fn absorb(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend(data.iter().copied()),
            ChannelMsg::ExtendedData { data, ext } => {
                if ext == SSH_EXTENDED_DATA_STDERR {
                    self.stderr.extend(data.iter().copied());
                } else {
                    self.stdout.extend(data.iter().copied());
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.exit_status = Some(exit_status);
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                debug!("Remote command killed by signal {:?}", signal_name);
                self.exit_signal = Some(format!("{:?}", signal_name));
            }
            ChannelMsg::Eof => self.eof = true,
            ChannelMsg::Close => self.closed = true,
            _ => {
                // window adjustments and request replies carry nothing we keep
            }
        }
    }

    /// russh stopped delivering messages for this channel
    pub(crate) fn end_of_stream(&mut self) {
        if !self.closed {
            self.dropped = true;
            self.closed = true;
        }
    }

    fn finished(&self) -> bool {
        self.closed
    }

    /// Whether the remote command is over.
    ///
    /// A stream that ended with no exit status, no signal and no EOF from
    /// the server means the session went away under the command.
    pub(crate) fn exit_ready(&self) -> Result<bool, TransportError> {
        if self.exit_status.is_some() || self.exit_signal.is_some() {
            return Ok(true);
        }
        if self.dropped && !self.eof {
            return Err(TransportError::session("channel closed by transport"));
        }
        Ok(self.closed)
    }

    pub(crate) fn exit_code(&self) -> Result<i32, TransportError> {
        match (self.exit_status, &self.exit_signal) {
            (Some(code), _) => Ok(i32::try_from(code).unwrap_or(i32::MAX)),
            (None, Some(signal)) => Err(TransportError::session(format!(
                "command terminated by signal {}",
                signal
            ))),
            (None, None) => Err(TransportError::session("no exit status reported")),
        }
    }

    pub(crate) fn take_stdout(&mut self, max: usize) -> Vec<u8> {
        take(&mut self.stdout, max)
    }

    pub(crate) fn take_stderr(&mut self, max: usize) -> Vec<u8> {
        take(&mut self.stderr, max)
    }
}

fn take(buffer: &mut VecDeque<u8>, max: usize) -> Vec<u8> {
    let n = max.min(buffer.len());
    buffer.drain(..n).collect()
}

/// A PTY session channel on an [`SshSession`](super::connection::SshSession)
pub struct SshChannel {
    inner: Channel<Msg>,
    state: ChannelState,
}

impl SshChannel {
    pub(crate) fn new(inner: Channel<Msg>) -> Self {
        Self {
            inner,
            state: ChannelState::default(),
        }
    }

    /// Absorb every message russh has already queued for this channel
    async fn pump(&mut self) {
        while !self.state.finished() {
            // A zero timeout still polls the receiver once, so queued
            // messages come through and an empty queue returns at once.
            match tokio::time::timeout(Duration::ZERO, self.inner.wait()).await {
                Ok(Some(msg)) => self.state.absorb(msg),
                Ok(None) => {
                    debug!("Channel {:?} message stream ended", self.inner.id());
                    self.state.end_of_stream();
                }
                Err(_) => break,
            }
        }
    }
}

#[async_trait]
impl CommandChannel for SshChannel {
    async fn exec(&mut self, command: &str) -> Result<(), TransportError> {
        self.inner
            .exec(true, command)
            .await
            .map_err(|e| TransportError::session(format!("Failed to exec command: {}", e)))
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.inner
            .data(data)
            .await
            .map_err(|e| TransportError::session(format!("Failed to write to channel: {}", e)))
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        // `data` only returns once the bytes were handed to the session writer
        Ok(())
    }

    async fn stdout_ready(&mut self) -> Result<bool, TransportError> {
        self.pump().await;
        Ok(!self.state.stdout.is_empty())
    }

    async fn stderr_ready(&mut self) -> Result<bool, TransportError> {
        self.pump().await;
        Ok(!self.state.stderr.is_empty())
    }

    async fn recv_stdout(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        self.pump().await;
        Ok(self.state.take_stdout(max))
    }

    async fn recv_stderr(&mut self, max: usize) -> Result<Vec<u8>, TransportError> {
        self.pump().await;
        Ok(self.state.take_stderr(max))
    }

    async fn exit_status_ready(&mut self) -> Result<bool, TransportError> {
        self.pump().await;
        self.state.exit_ready()
    }

    async fn exit_status(&mut self) -> Result<i32, TransportError> {
        self.pump().await;
        self.state.exit_code()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.state.finished() {
            return Ok(());
        }
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::session(format!("Failed to close channel: {}", e)))
    }
}
