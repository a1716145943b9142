// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `stackup`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stackup",
    disable_version_flag = true,
    about = "Bring your whole dev stack up with one command.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the tasks file (YAML).
    #[arg(short = 'f', long = "file", value_name = "PATH", default_value = "tasks.yaml")]
    pub config: String,

    /// Do not watch files for changes (also WATCH=0 / KIT_WATCH=0).
    #[arg(short = 'W', long = "no-watch")]
    pub no_watch: bool,

    /// Print version and exit.
    #[arg(short = 'v', long = "version")]
    pub version: bool,

    /// Logging level for diagnostics (error, warn, info, debug, trace).
    ///
    /// If omitted, `STACKUP_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Root tasks to bring up; their dependencies come with them.
    #[arg(value_name = "TASK", default_values_t = vec!["up".to_string()])]
    pub tasks: Vec<String>,
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
