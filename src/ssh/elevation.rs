//! sudo wrapping and password handling
//!
//! Commands run as `sudo -S -p '' <command>`: sudo reads one password line
//! from the channel input and prints no prompt, so the executor can write the
//! password blind right after `exec`.

/// Prefix every elevated command carries
const SUDO_PREFIX: &str = "sudo -S -p ''";

/// Prepend the sudo invocation; the command itself is passed through untouched.
///
/// ```
/// use ssh_provision::ssh::elevation::wrap_sudo_command;
///
/// assert_eq!(
///     wrap_sudo_command("systemctl restart oxidized"),
///     "sudo -S -p '' systemctl restart oxidized"
/// );
/// ```
pub fn wrap_sudo_command(command: &str) -> String {
    format!("{} {}", SUDO_PREFIX, command)
}

/// Password followed by the newline sudo waits for
pub fn password_line(password: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(password.len() + 1);
    line.extend_from_slice(password.as_bytes());
    line.push(b'\n');
    line
}

/// Make `s` safe inside a single-quoted shell word.
///
/// Each `'` becomes `'"'"'`: close the quote, emit a double-quoted quote,
/// reopen.
///
/// ```
/// use ssh_provision::ssh::elevation::escape_for_shell;
///
/// assert_eq!(escape_for_shell("rt-01:ios"), "rt-01:ios");
/// assert_eq!(escape_for_shell("o'brien"), "o'\"'\"'brien");
/// ```
pub fn escape_for_shell(s: &str) -> String {
    s.replace('\'', r#"'"'"'"#)
}

/// A password sudo can consume as exactly one line
pub fn is_valid_password(password: &str) -> bool {
    !password.trim().is_empty() && !password.contains(['\0', '\n', '\r'])
}

/// Drop missing or empty passwords. Whitespace is kept as-is.
pub fn sanitize_password(password: Option<&str>) -> Option<String> {
    password.filter(|p| !p.is_empty()).map(str::to_owned)
}
