//! SSH session
//!
//! Establishes and authenticates one SSH connection and opens the PTY
//! command channels and SFTP sub-channels the execution engine runs on.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::channel::SshChannel;
use super::config::SshConfig;
use super::handler::SshHandler;
use super::sftp::SftpFileTransport;
use crate::error::TransportError;
use crate::transport::TransportSession;

/// Terminal geometry requested for command channels
const PTY_TERM: &str = "xterm";
const PTY_COLS: u32 = 80;
const PTY_ROWS: u32 = 24;
const PTY_MODES: &[(russh::Pty, u32)] = &[(russh::Pty::ECHO, 0)];

/// An authenticated SSH connection
pub struct SshSession {
    /// SSH configuration
    config: SshConfig,

    /// Active SSH session handle
    handle: Handle<SshHandler>,
}

impl SshSession {
    /// Connect and authenticate
    ///
    /// TCP connect, key exchange and authentication together are bounded by
    /// `config.connect_timeout`.
    pub async fn connect(config: SshConfig) -> Result<Self, TransportError> {
        info!(
            "Connecting to SSH server {}:{}...",
            config.host, config.port
        );

        let handle = match timeout(config.connect_timeout, Self::establish(&config)).await {
            Ok(result) => result?,
            Err(_) => {
                error!(
                    "SSH connection timeout after {}s",
                    config.connect_timeout.as_secs()
                );
                return Err(TransportError::connection(format!(
                    "Connection timeout after {}s",
                    config.connect_timeout.as_secs()
                )));
            }
        };

        info!(
            "Successfully connected to {}@{}:{}",
            config.username, config.host, config.port
        );

        Ok(Self { config, handle })
    }

    async fn establish(config: &SshConfig) -> Result<Handle<SshHandler>, TransportError> {
        let ssh_config = Arc::new(client::Config::default());
        let addr = config.address();

        let mut handle =
            client::connect(ssh_config, addr.as_str(), SshHandler::new(&config.host))
                .await
                .map_err(|e| {
                    error!("SSH connection failed: {}", e);
                    TransportError::connection(e.to_string())
                })?;

        Self::authenticate(&mut handle, config).await?;
        Ok(handle)
    }

    /// Authenticate with the SSH server
    async fn authenticate(
        handle: &mut Handle<SshHandler>,
        config: &SshConfig,
    ) -> Result<(), TransportError> {
        // Try password authentication first
        if let Some(ref password) = config.password {
            debug!(
                "Attempting password authentication for user '{}'",
                config.username
            );
            let auth_result = handle
                .authenticate_password(&config.username, password)
                .await
                .map_err(|e| TransportError::auth(e.to_string()))?;

            if auth_result.success() {
                info!("Password authentication successful");
                return Ok(());
            }
            // Fall through to key authentication when one is configured
            if config.private_key.is_none() {
                return Err(TransportError::auth("Password authentication rejected"));
            }
            debug!("Password rejected, trying key authentication");
        }

        if let Some(ref key_content) = config.private_key {
            debug!(
                "Attempting key authentication for user '{}'",
                config.username
            );

            let key = russh::keys::PrivateKey::from_openssh(key_content.as_bytes())
                .map_err(|e| TransportError::SshKey(format!("Failed to parse private key: {}", e)))?;

            let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

            let auth_result = handle
                .authenticate_publickey(&config.username, key_with_alg)
                .await
                .map_err(|e| TransportError::auth(e.to_string()))?;

            if auth_result.success() {
                info!("Key authentication successful");
                return Ok(());
            }
            return Err(TransportError::auth("Key authentication rejected"));
        }

        Err(TransportError::auth(
            "No authentication method available (require password or private_key)",
        ))
    }

    /// Open a plain session channel
    async fn open_session_channel(
        &self,
    ) -> Result<russh::Channel<client::Msg>, TransportError> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::channel_open(e.to_string()))
    }

    /// Close the SSH connection
    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            debug!("Disconnect failed: {}", e);
        }

        info!("SSH connection to {} closed", self.config.host);
    }
}

#[async_trait]
impl TransportSession for SshSession {
    type Channel = SshChannel;
    type Files = SftpFileTransport;

    async fn open_pty_channel(&self) -> Result<SshChannel, TransportError> {
        let channel = self.open_session_channel().await?;

        // sudo -S only takes a password from a terminal-backed stdin on many
        // hosts. Echo stays off so the password written blind is not copied
        // back into the output.
        channel
            .request_pty(true, PTY_TERM, PTY_COLS, PTY_ROWS, 0, 0, PTY_MODES)
            .await
            .map_err(|e| TransportError::channel_open(format!("Failed to request PTY: {}", e)))?;

        debug!("Opened PTY channel");
        Ok(SshChannel::new(channel))
    }

    async fn open_file_transport(&self) -> Result<SftpFileTransport, TransportError> {
        let channel = self.open_session_channel().await?;
        SftpFileTransport::open(channel).await
    }
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("username", &self.config.username)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 on localhost is closed on any sane test host
        let config = SshConfig::new("127.0.0.1", "testuser")
            .with_port(1)
            .with_password("testpass")
            .with_connect_timeout(Duration::from_secs(5));

        let err = SshSession::connect(config).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[tokio::test]
    async fn test_connect_gives_up_on_silent_server() {
        // Accepts the TCP connection, then never speaks SSH
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let config = SshConfig::new("127.0.0.1", "testuser")
            .with_port(port)
            .with_password("testpass")
            .with_connect_timeout(Duration::from_millis(300));

        let started = std::time::Instant::now();
        let err = SshSession::connect(config).await.unwrap_err();

        assert!(matches!(err, TransportError::Connection(ref msg) if msg.contains("timeout")));
        assert!(started.elapsed() < Duration::from_secs(10));
        server.abort();
    }
}
