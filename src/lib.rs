//! ssh-provision - privileged remote provisioning over SSH
//!
//! This crate runs ordered batches of shell commands on a remote Linux host
//! through `sudo`, and edits sectioned configuration files (such as an
//! Oxidized `router.db`) in place over SFTP.
//!
//! # Features
//!
//! - Run a command with `sudo -S` on a PTY channel, bounded by a timeout
//! - Run ordered command batches with optional stop-on-error
//! - Insert an entry into a `[SECTION]` of a config document, rejecting duplicates
//! - Insert a single line into a remote file with `sed`
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ssh-provision --host=192.168.1.100 --user=admin --password=secret \
//!   exec --stop-on-error "apt-get update" "systemctl restart oxidized"
//!
//! ssh-provision --host=192.168.1.100 --user=admin --password=secret \
//!   insert --path /home/oxidized/.config/oxidized/router.db --entry "sw-02:eos"
//! ```
//!
//! # Example Usage (library)
//!
//! ```
//! use ssh_provision::insert_into_section;
//!
//! let doc = "[CORE]\nrt-01:ios\n[BKP]\nsw-01:eos\n";
//! let updated = insert_into_section(doc, "bkp", "sw-02:eos").unwrap();
//! assert_eq!(updated, "[CORE]\nrt-01:ios\n[BKP]\nsw-01:eos\nsw-02:eos\n");
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod section;
pub mod ssh;
pub mod transport;
pub mod workflow;

// Re-exports for convenience
pub use config::{Args, Command, Config};
pub use error::{BatchError, ProvisionError, Result, SectionError, TransportError};
pub use exec::{
    execute, run, split_commands, BatchPolicy, CommandResult, CommandSequencer, ExecutionBatch,
    PrivilegedExecutor, DEFAULT_COMMAND_TIMEOUT,
};
pub use section::{insert_into_section, ConfigDocument};
pub use ssh::{
    escape_for_shell, sanitize_command, sanitize_password, wrap_sudo_command, SshConfig,
    SshHandler, SshSession,
};
pub use transport::{CommandChannel, FileTransport, TransportSession};
pub use workflow::{
    check_connection, insert_config_entry, insert_line, run_sudo_command, LinePosition,
};
