//! ssh-provision - Entry point
//!
//! Parses CLI arguments, validates configuration, opens one SSH session,
//! runs the requested subcommand on it and closes the session again.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ssh_provision::config::{line_position, Args, Command, Config};
use ssh_provision::error::ProvisionError;
use ssh_provision::exec::{run, split_commands, BatchPolicy, CommandResult};
use ssh_provision::ssh::{sanitize_command, SshSession};
use ssh_provision::workflow::{check_connection, insert_config_entry, insert_line, LinePosition};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries command results
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_args(args)?;

    info!("ssh-provision v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Timeout: {}s, Max chars: {}",
        config.timeout.as_secs(),
        config
            .max_chars
            .map_or("unlimited".to_string(), |n| n.to_string())
    );

    // Read and validate local input before touching the network
    let job = Job::prepare(&config).await?;

    let session = SshSession::connect(config.ssh_config().await?).await?;

    let outcome = tokio::select! {
        outcome = job.run(&session, &config) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received SIGINT (Ctrl+C), aborting...");
            Ok(ExitCode::from(130))
        }
    };

    session.close().await;
    outcome
}

/// A subcommand with its local inputs already loaded and checked
enum Job {
    Exec {
        commands: Vec<String>,
        stop_on_error: bool,
        json: bool,
    },
    Insert {
        path: String,
        section: String,
        entry: String,
    },
    InsertLine {
        path: String,
        line: String,
        position: LinePosition,
    },
    Check {
        command: String,
    },
}

impl Job {
    async fn prepare(config: &Config) -> anyhow::Result<Self> {
        let job = match &config.command {
            Command::Exec {
                file,
                stop_on_error,
                json,
                commands,
            } => {
                let raw = match file {
                    Some(path) => split_commands(&read_input(path).await?),
                    None => commands.clone(),
                };
                let commands = raw
                    .iter()
                    .map(|c| sanitize_command(c, config.max_chars))
                    .collect::<Result<Vec<_>, ProvisionError>>()?;
                if commands.is_empty() {
                    anyhow::bail!("No commands to run");
                }
                Job::Exec {
                    commands,
                    stop_on_error: *stop_on_error,
                    json: *json,
                }
            }
            Command::Insert {
                path,
                section,
                entry,
                entry_file,
            } => {
                let entry = match (entry, entry_file) {
                    (Some(entry), _) => entry.clone(),
                    (None, Some(file)) => split_commands(&read_input(file).await?).join("\n"),
                    (None, None) => anyhow::bail!("insert needs --entry or --entry-file"),
                };
                if entry.trim().is_empty() {
                    anyhow::bail!("Entry to insert is empty");
                }
                Job::Insert {
                    path: path.clone(),
                    section: section.clone(),
                    entry,
                }
            }
            Command::InsertLine {
                path,
                line,
                after_pattern,
                after_line,
            } => Job::InsertLine {
                path: path.clone(),
                line: line.clone(),
                position: line_position(after_pattern.as_deref(), *after_line),
            },
            Command::Check { command } => Job::Check {
                command: command.clone(),
            },
        };
        Ok(job)
    }

    async fn run(&self, session: &SshSession, config: &Config) -> anyhow::Result<ExitCode> {
        match self {
            Job::Exec {
                commands,
                stop_on_error,
                json,
            } => {
                let password = sudo_password(config)?;
                let policy = BatchPolicy::interactive()
                    .with_stop_on_error(*stop_on_error)
                    .with_timeout(config.timeout);

                match run(session, password, commands.as_slice(), policy).await {
                    Ok(batch) => {
                        report(batch.results(), None, *json)?;
                        if batch.all_ok() {
                            info!("All {} commands succeeded", batch.len());
                            Ok(ExitCode::SUCCESS)
                        } else {
                            warn!(
                                "{} of {} commands failed",
                                batch.failures().count(),
                                batch.len()
                            );
                            Ok(ExitCode::FAILURE)
                        }
                    }
                    Err(e) => {
                        error!("{}", e);
                        report(e.results(), Some(&e.to_string()), *json)?;
                        Ok(ExitCode::FAILURE)
                    }
                }
            }
            Job::Insert {
                path,
                section,
                entry,
            } => {
                insert_config_entry(session, path, section, entry).await?;
                println!("Inserted into [{}] of {}", section, path);
                Ok(ExitCode::SUCCESS)
            }
            Job::InsertLine {
                path,
                line,
                position,
            } => {
                let password = sudo_password(config)?;
                let result =
                    insert_line(session, password, path, line, position, config.timeout).await?;
                print_result(&result);
                Ok(exit_code(result.ok))
            }
            Job::Check { command } => {
                let result = check_connection(session, command, config.timeout).await?;
                print_result(&result);
                Ok(exit_code(result.ok))
            }
        }
    }
}

fn sudo_password(config: &Config) -> anyhow::Result<&str> {
    config
        .sudo_password
        .as_deref()
        .context("A sudo password is required for this command")
}

/// Read a whole local file, or stdin when `path` is "-"
async fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("Failed to read stdin")?;
        return Ok(text);
    }

    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn report(results: &[CommandResult], failure: Option<&str>, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        let body = json!({
            "ok": failure.is_none() && results.iter().all(|r| r.ok),
            "error": failure,
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        results.iter().for_each(print_result);
    }
    Ok(())
}

fn print_result(result: &CommandResult) {
    println!(">>> {}", result.command);
    println!("RC: {}  OK: {}", result.exit_code, result.ok);
    if result.timed_out {
        println!("(timed out, output may be incomplete)");
    }
    if !result.stdout.is_empty() {
        println!("STDOUT:\n{}", result.stdout);
    }
    if !result.stderr.is_empty() {
        println!("STDERR:\n{}", result.stderr);
    }
    println!("----");
}
