//! Error types for ssh-provision

use thiserror::Error;

use crate::exec::CommandResult;

/// Main error type for ssh-provision
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// SSH transport failure (connection, channel, file transfer)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A command batch was terminated early
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Config document edit rejected
    #[error(transparent)]
    Section(#[from] SectionError),

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ProvisionError
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        ProvisionError::InvalidParams(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        ProvisionError::Config(msg.into())
    }
}

/// Failures reported by the SSH session, its channels or its file transport.
///
/// These are distinct from a command exiting non-zero, which is recorded in
/// a [`CommandResult`] instead.
#[derive(Debug, Error)]
pub enum TransportError {
    /// SSH connection failed
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication failed (password or key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// A command or file-transfer channel could not be opened
    #[error("Failed to open channel: {0}")]
    ChannelOpen(String),

    /// Protocol-level error on an open session or channel
    #[error("SSH session error: {0}")]
    Session(String),

    /// Remote file does not exist
    #[error("Remote file not found: {path}")]
    FileNotFound { path: String },

    /// Remote file could not be read or written
    #[error("Remote file I/O error on {path}: {message}")]
    FileIo { path: String, message: String },
}

impl TransportError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        TransportError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        TransportError::Authentication(msg.into())
    }

    /// Create a channel-open error from a string
    pub fn channel_open(msg: impl Into<String>) -> Self {
        TransportError::ChannelOpen(msg.into())
    }

    /// Create a session error from a string
    pub fn session(msg: impl Into<String>) -> Self {
        TransportError::Session(msg.into())
    }

    /// Create a file I/O error for `path`
    pub fn file_io(path: impl Into<String>, msg: impl Into<String>) -> Self {
        TransportError::FileIo {
            path: path.into(),
            message: msg.into(),
        }
    }
}

/// Early termination of a command batch.
///
/// Both variants carry every result collected before the batch stopped,
/// including the failing command's own result for `CommandFailed`.
#[derive(Debug, Error)]
pub enum BatchError {
    /// A command exited non-zero while stop-on-error was set
    #[error("Command failed (exit code {exit_code}): {command}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
        results: Vec<CommandResult>,
    },

    /// The transport failed while a command was in flight
    #[error("SSH error while executing '{command}': {source}")]
    Transport {
        command: String,
        #[source]
        source: TransportError,
        results: Vec<CommandResult>,
    },
}

impl BatchError {
    /// The command that ended the batch
    pub fn command(&self) -> &str {
        match self {
            BatchError::CommandFailed { command, .. } | BatchError::Transport { command, .. } => {
                command
            }
        }
    }

    /// Results collected before the batch stopped
    pub fn results(&self) -> &[CommandResult] {
        match self {
            BatchError::CommandFailed { results, .. } | BatchError::Transport { results, .. } => {
                results
            }
        }
    }

    /// Consume the error, keeping the partial results
    pub fn into_results(self) -> Vec<CommandResult> {
        match self {
            BatchError::CommandFailed { results, .. } | BatchError::Transport { results, .. } => {
                results
            }
        }
    }
}

/// Precondition violations raised by the section editor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SectionError {
    #[error("Section '{section}' not found in configuration document")]
    SectionNotFound { section: String },

    #[error("Entry already present in section '{section}': {entry}")]
    DuplicateEntry { section: String, entry: String },
}
