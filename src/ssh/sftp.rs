//! Remote file access over the SFTP subsystem

use async_trait::async_trait;
use russh::client::Msg;
use russh::Channel;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::FileTransport;

/// Whole-file text reads and writes through an SFTP session
pub struct SftpFileTransport {
    sftp: SftpSession,
}

impl SftpFileTransport {
    /// Start the `sftp` subsystem on a freshly opened session channel
    pub(crate) async fn open(channel: Channel<Msg>) -> Result<Self, TransportError> {
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| {
                TransportError::channel_open(format!("Failed to request sftp subsystem: {}", e))
            })?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransportError::channel_open(format!("Failed to start sftp: {}", e)))?;

        debug!("SFTP session started");
        Ok(Self { sftp })
    }
}

fn map_sftp_error(path: &str, err: SftpError) -> TransportError {
    match err {
        SftpError::Status(status) if matches!(status.status_code, StatusCode::NoSuchFile) => {
            TransportError::FileNotFound {
                path: path.to_string(),
            }
        }
        other => TransportError::file_io(path, other.to_string()),
    }
}

#[async_trait]
impl FileTransport for SftpFileTransport {
    /// Read `path` as UTF-8; invalid UTF-8 is an error so a later write-back
    /// cannot silently alter bytes
    async fn read_text(&mut self, path: &str) -> Result<String, TransportError> {
        let bytes = self
            .sftp
            .read(path)
            .await
            .map_err(|e| map_sftp_error(path, e))?;

        debug!("Read {} bytes from {}", bytes.len(), path);
        String::from_utf8(bytes)
            .map_err(|e| TransportError::file_io(path, format!("not valid UTF-8: {}", e)))
    }

    async fn write_text(&mut self, path: &str, text: &str) -> Result<(), TransportError> {
        let mut file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| map_sftp_error(path, e))?;

        file.write_all(text.as_bytes())
            .await
            .map_err(|e| TransportError::file_io(path, e.to_string()))?;
        file.shutdown()
            .await
            .map_err(|e| TransportError::file_io(path, e.to_string()))?;

        debug!("Wrote {} bytes to {}", text.len(), path);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sftp
            .close()
            .await
            .map_err(|e| TransportError::session(format!("Failed to close sftp session: {}", e)))
    }
}
