//! SSH transport module
//!
//! russh-backed implementation of the [`crate::transport`] traits, plus the
//! sudo wrapping and command sanitizing helpers used on top of it.

pub mod channel;
pub mod config;
pub mod connection;
pub mod elevation;
pub mod handler;
pub mod sanitize;
pub mod sftp;

// Re-exports
pub use channel::SshChannel;
pub use config::SshConfig;
pub use connection::SshSession;
pub use elevation::{escape_for_shell, sanitize_password, wrap_sudo_command};
pub use handler::SshHandler;
pub use sanitize::sanitize_command;
pub use sftp::SftpFileTransport;
