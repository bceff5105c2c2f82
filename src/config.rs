//! Configuration and CLI argument parsing for ssh-provision

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::error::{ProvisionError, Result};
use crate::ssh::elevation::{is_valid_password, sanitize_password};
use crate::ssh::SshConfig;
use crate::workflow::{LinePosition, DEFAULT_CHECK_COMMAND, DEFAULT_SECTION};

/// Default per-command timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default max characters for a single command (None = unlimited)
pub const DEFAULT_MAX_CHARS: Option<usize> = Some(1000);

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// ssh-provision CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-provision")]
#[command(version)]
#[command(about = "Run sudo command batches and edit sectioned config files on a remote host over SSH")]
pub struct Args {
    /// SSH host to connect to
    #[arg(long, env = "SSH_HOST", global = true)]
    pub host: Option<String>,

    /// SSH port
    #[arg(long, default_value = "22", env = "SSH_PORT", global = true)]
    pub port: u16,

    /// SSH username
    #[arg(long, env = "SSH_USER", global = true)]
    pub user: Option<String>,

    /// SSH password (alternative to key)
    #[arg(long, env = "SSH_PASS", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Path to SSH private key file (alternative to password)
    #[arg(long, env = "SSH_KEY", global = true)]
    pub key: Option<PathBuf>,

    /// Password for sudo (defaults to the SSH password)
    #[arg(long, env = "SSH_SUDO_PASS", hide_env_values = true, global = true)]
    pub sudo_password: Option<String>,

    /// Per-command timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "SSH_PROVISION_TIMEOUT", global = true)]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = CONNECTION_TIMEOUT_SECS, global = true)]
    pub connect_timeout: u64,

    /// Maximum characters per command.
    /// Use "none", "0", or negative value to disable limit.
    /// Default: 1000
    #[arg(long = "max-chars", env = "SSH_PROVISION_MAX_CHARS", global = true)]
    pub max_chars: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// What to do once connected
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run commands with sudo, in order
    Exec {
        /// Read a rendered command block (one command per line) from a file, or "-" for stdin
        #[arg(long, short)]
        file: Option<PathBuf>,

        /// Stop at the first command that exits non-zero
        #[arg(long)]
        stop_on_error: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Commands to run (each argument is one command)
        commands: Vec<String>,
    },

    /// Insert an entry into a [SECTION] of a remote config file
    Insert {
        /// Remote file path
        #[arg(long)]
        path: String,

        /// Section name (case-insensitive)
        #[arg(long, default_value = DEFAULT_SECTION)]
        section: String,

        /// Entry to insert
        #[arg(long, conflicts_with = "entry_file", required_unless_present = "entry_file")]
        entry: Option<String>,

        /// Read the entry from a file (generated lines, trimmed, blanks dropped)
        #[arg(long)]
        entry_file: Option<PathBuf>,
    },

    /// Insert one line into a remote file with sed, under sudo
    InsertLine {
        /// Remote file path
        #[arg(long)]
        path: String,

        /// Line to insert
        #[arg(long)]
        line: String,

        /// Insert after lines matching this sed regex
        #[arg(long, conflicts_with = "after_line")]
        after_pattern: Option<String>,

        /// Insert after this 1-based line number
        #[arg(long)]
        after_line: Option<usize>,
    },

    /// Connect and run a test command without sudo
    Check {
        /// Test command
        #[arg(long, default_value = DEFAULT_CHECK_COMMAND)]
        command: String,
    },
}

impl Command {
    /// Whether this subcommand runs anything through sudo
    pub fn needs_sudo(&self) -> bool {
        matches!(self, Command::Exec { .. } | Command::InsertLine { .. })
    }
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SSH host
    pub host: String,

    /// SSH port
    pub port: u16,

    /// SSH username
    pub user: String,

    /// SSH password
    pub password: Option<String>,

    /// Path to SSH private key
    pub key: Option<PathBuf>,

    /// Password for sudo commands
    pub sudo_password: Option<String>,

    /// Per-command timeout
    pub timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Maximum command length (None = unlimited)
    pub max_chars: Option<usize>,

    /// Debug logging requested
    pub verbose: bool,

    /// Subcommand to run
    pub command: Command,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let max_chars = parse_max_chars(args.max_chars.as_deref());
        let password = sanitize_password(args.password.as_deref());
        let sudo_password =
            sanitize_password(args.sudo_password.as_deref()).or_else(|| password.clone());

        Ok(Config {
            host: args.host.unwrap_or_default(),
            port: args.port,
            user: args.user.unwrap_or_default(),
            password,
            key: args.key,
            sudo_password,
            timeout: Duration::from_secs(args.timeout),
            connect_timeout: Duration::from_secs(args.connect_timeout),
            max_chars,
            verbose: args.verbose,
            command: args.command,
        })
    }

    /// Build the SSH connection settings, reading the key file if one is set
    pub async fn ssh_config(&self) -> Result<SshConfig> {
        let mut ssh_config = SshConfig::new(&self.host, &self.user)
            .with_port(self.port)
            .with_connect_timeout(self.connect_timeout);

        if let Some(ref password) = self.password {
            ssh_config = ssh_config.with_password(password);
        }

        if let Some(ref key_path) = self.key {
            let key_content = tokio::fs::read_to_string(key_path).await?;
            ssh_config = ssh_config.with_private_key(key_content);
        }

        Ok(ssh_config)
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.host.as_deref().map_or(true, str::is_empty) {
        errors.push("Missing required --host (or SSH_HOST)".to_string());
    }

    if args.user.as_deref().map_or(true, str::is_empty) {
        errors.push("Missing required --user (or SSH_USER)".to_string());
    }

    // Must have either password or key
    let has_password = args.password.as_deref().is_some_and(|p| !p.is_empty());
    if !has_password && args.key.is_none() {
        errors.push("Must provide either --password or --key".to_string());
    }

    // If key is provided, check if file exists
    if let Some(ref key_path) = args.key {
        if !key_path.exists() {
            errors.push(format!("SSH key file not found: {}", key_path.display()));
        }
    }

    if args.timeout == 0 {
        errors.push("--timeout must be at least 1 second".to_string());
    }

    if args.command.needs_sudo() {
        let sudo_password = args
            .sudo_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(args.password.as_deref());
        match sudo_password {
            Some(p) if is_valid_password(p) => {}
            Some(_) => errors.push(
                "sudo password must be non-blank and a single line".to_string(),
            ),
            None => errors.push(
                "This command needs a sudo password (--sudo-password or --password)".to_string(),
            ),
        }
    }

    if let Command::Exec { file, commands, .. } = &args.command {
        if file.is_none() && commands.is_empty() {
            errors.push("exec needs commands or --file".to_string());
        }
        if file.is_some() && !commands.is_empty() {
            errors.push("exec takes either commands or --file, not both".to_string());
        }
    }

    if !errors.is_empty() {
        return Err(ProvisionError::config(format!("\n{}", errors.join("\n"))));
    }

    Ok(())
}

/// Map `insert-line` flags to a [`LinePosition`]
pub fn line_position(after_pattern: Option<&str>, after_line: Option<usize>) -> LinePosition {
    match (after_pattern, after_line) {
        (Some(pattern), _) => LinePosition::AfterPattern(pattern.to_string()),
        (None, Some(n)) => LinePosition::AfterLine(n),
        (None, None) => LinePosition::Append,
    }
}

/// Parse max_chars argument
///
/// - "none" (case-insensitive) → None (unlimited)
/// - "0" or negative → None (unlimited)
/// - positive integer → Some(value)
/// - None (not provided) → DEFAULT_MAX_CHARS
pub fn parse_max_chars(value: Option<&str>) -> Option<usize> {
    match value {
        None => DEFAULT_MAX_CHARS,
        Some(s) => {
            if s.eq_ignore_ascii_case("none") {
                return None;
            }

            match s.parse::<i64>() {
                Ok(n) if n <= 0 => None,
                Ok(n) => usize::try_from(n).ok(),
                Err(_) => DEFAULT_MAX_CHARS,
            }
        }
    }
}
