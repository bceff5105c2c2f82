//! End-to-end operations built on the execution engine and section editor
//!
//! Each function takes an already-connected [`TransportSession`]; opening
//! and closing the session itself is the caller's job.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{ProvisionError, Result};
use crate::exec::{CommandResult, PrivilegedExecutor};
use crate::section::insert_into_section;
use crate::ssh::elevation::escape_for_shell;
use crate::ssh::sanitize::sanitize_command;
use crate::transport::{FileTransport, TransportSession};

/// Section used by the config-insertion workflow when none is given
pub const DEFAULT_SECTION: &str = "BKP";

/// Command run by [`check_connection`] when none is given
pub const DEFAULT_CHECK_COMMAND: &str = "echo 'SSH connection OK'";

/// Insert `entry` into `section` of the remote file at `path`.
///
/// The file is read, edited in memory and written back whole. A missing
/// section or duplicate entry fails before anything is written. The file
/// transport is closed on every path.
pub async fn insert_config_entry<S>(
    session: &S,
    path: &str,
    section: &str,
    entry: &str,
) -> Result<()>
where
    S: TransportSession + ?Sized,
{
    let mut files = session.open_file_transport().await?;
    let outcome = edit_remote_file(&mut files, path, section, entry).await;

    if let Err(e) = files.close().await {
        warn!("Failed to close file transport: {}", e);
    }

    outcome
}

async fn edit_remote_file<F>(files: &mut F, path: &str, section: &str, entry: &str) -> Result<()>
where
    F: FileTransport + ?Sized,
{
    let original = files.read_text(path).await?;
    let updated = insert_into_section(&original, section, entry)?;
    files.write_text(path, &updated).await?;

    info!("Inserted entry into section '{}' of {}", section, path);
    Ok(())
}

/// Run one operator-supplied command with sudo
pub async fn run_sudo_command<S>(
    session: &S,
    command: &str,
    elevation_password: &str,
    timeout: Duration,
    max_chars: Option<usize>,
) -> Result<CommandResult>
where
    S: TransportSession + ?Sized,
{
    let command = sanitize_command(command, max_chars)?;
    let result = PrivilegedExecutor::default()
        .execute(session, &command, elevation_password, timeout)
        .await?;

    if result.ok {
        info!("sudo command '{}' succeeded", command);
    } else {
        error!(
            "sudo command '{}' failed with exit code {}",
            command, result.exit_code
        );
    }
    Ok(result)
}

/// Where [`build_sed_insert`] places the new line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinePosition {
    /// After every line matching a sed regular expression
    AfterPattern(String),
    /// After the given 1-based line number
    AfterLine(usize),
    /// After the last line
    Append,
}

/// Build a `sed -i` command that inserts `line` into the file at `path`
pub fn build_sed_insert(path: &str, line: &str, position: &LinePosition) -> Result<String> {
    if path.trim().is_empty() {
        return Err(ProvisionError::invalid_params("File path cannot be empty"));
    }
    if line.contains(['\n', '\r']) {
        return Err(ProvisionError::invalid_params(
            "Line to insert must not contain line breaks",
        ));
    }

    let address = match position {
        LinePosition::AfterPattern(pattern) if pattern.is_empty() => {
            return Err(ProvisionError::invalid_params("Pattern cannot be empty"));
        }
        LinePosition::AfterPattern(pattern) => {
            format!("/{}/", escape_for_shell(&pattern.replace('/', "\\/")))
        }
        LinePosition::AfterLine(0) => {
            return Err(ProvisionError::invalid_params(
                "Line numbers start at 1",
            ));
        }
        LinePosition::AfterLine(n) => n.to_string(),
        LinePosition::Append => "$".to_string(),
    };

    Ok(format!(
        "sed -i '{}a\\{}' '{}'",
        address,
        escape_for_shell(line),
        escape_for_shell(path)
    ))
}

/// Insert a single line into a remote file with `sed -i` under sudo
pub async fn insert_line<S>(
    session: &S,
    elevation_password: &str,
    path: &str,
    line: &str,
    position: &LinePosition,
    timeout: Duration,
) -> Result<CommandResult>
where
    S: TransportSession + ?Sized,
{
    let sed = build_sed_insert(path, line, position)?;
    run_sudo_command(session, &sed, elevation_password, timeout, None).await
}

/// Run a harmless command as the login user to confirm the session works
pub async fn check_connection<S>(
    session: &S,
    command: &str,
    timeout: Duration,
) -> Result<CommandResult>
where
    S: TransportSession + ?Sized,
{
    let result = PrivilegedExecutor::default()
        .execute_plain(session, command, timeout)
        .await?;

    if result.ok {
        info!("Connection check succeeded: {}", result.stdout);
    } else {
        error!(
            "Connection check command failed with exit code {}: {}",
            result.exit_code, result.stderr
        );
    }
    Ok(result)
}
