//! Checks applied to operator-supplied commands before they reach sudo

use crate::error::{ProvisionError, Result};

/// Normalize one command line for execution.
///
/// Surrounding whitespace is trimmed. Empty commands, embedded line breaks
/// and commands longer than `max_chars` characters are rejected; `None`
/// means no length limit.
///
/// ```
/// use ssh_provision::ssh::sanitize::sanitize_command;
///
/// assert_eq!(sanitize_command("  uptime  ", Some(1000)).unwrap(), "uptime");
/// assert!(sanitize_command("id\nwhoami", None).is_err());
/// ```
pub fn sanitize_command(command: &str, max_chars: Option<usize>) -> Result<String> {
    let command = command.trim();

    if command.is_empty() {
        return Err(ProvisionError::invalid_params("Command cannot be empty"));
    }

    // sudo would only see the first line
    if command.contains(['\n', '\r']) {
        return Err(ProvisionError::invalid_params(
            "Command must be a single line",
        ));
    }

    match max_chars {
        Some(max) if command.chars().count() > max => {
            Err(ProvisionError::invalid_params(format!(
                "Command is too long (max {} characters, got {})",
                max,
                command.chars().count()
            )))
        }
        _ => Ok(command.to_string()),
    }
}
