// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `stackdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stackdag",
    version,
    about = "Create, tear down and inspect dependency-ordered resource stacks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the stack template (TOML).
    ///
    /// Default: `Stack.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Stack.toml")]
    pub template: String,

    /// Name of the stack to create.
    #[arg(long, value_name = "NAME", default_value = "stack")]
    pub name: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STACKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the create and delete orders, but don't run
    /// anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Delete the stack again once the create has finished.
    #[arg(long)]
    pub teardown: bool,

    /// Leave created resources in place when the create fails.
    #[arg(long)]
    pub no_rollback: bool,

    /// Reject a second action on a busy stack instead of queueing it.
    #[arg(long)]
    pub reject_concurrent: bool,
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
