//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use tracing::debug;

/// SSH client handler for russh
///
/// Host key policy belongs to the deployment, not to this crate: every
/// server key is accepted and only logged.
#[derive(Debug, Clone, Default)]
pub struct SshHandler {
    host: String,
}

impl SshHandler {
    /// Create a handler for connections to `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("Accepting server host key for {}", self.host);
        Ok(true)
    }
}
