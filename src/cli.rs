// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::parse_duration;

/// Command-line arguments for `chainbot`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "chainbot",
    version,
    about = "Run block, event-log and cron handlers with circuit breaking and metrics.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the bot config file (TOML).
    ///
    /// A missing file is not an error: all settings have defaults.
    #[arg(long, value_name = "PATH", default_value = "Bot.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CHAINBOT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Override `[bot].max_exceptions` from the config file.
    #[arg(long, value_name = "N")]
    pub max_exceptions: Option<u32>,

    /// Parse + validate, print config and handlers, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl CliArgs {
    /// Arguments as if invoked with only `--config PATH`.
    pub fn with_config(path: impl Into<String>) -> Self {
        Self {
            config: path.into(),
            log_level: None,
            max_exceptions: None,
            dry_run: false,
            command: None,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the bot: trigger sources, lifecycle and (optionally) local workers.
    Run,

    /// Only execute work pulled from the distributed queue.
    Worker {
        /// Number of workers; defaults to `[broker].workers`.
        #[arg(short = 'w', long, value_name = "N")]
        workers: Option<usize>,

        /// How long stopping workers may take before they are aborted;
        /// defaults to `[bot].drain_timeout`.
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        shutdown_timeout: Option<Duration>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
