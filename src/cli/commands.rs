//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tagsync - Declarative resource tag reconciliation.
#[derive(Parser, Debug)]
#[command(name = "tagsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "TAGSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compare declared tags with the tags on each resource.
    Plan {
        /// Only plan this resource.
        #[arg(short, long)]
        resource: Option<String>,

        /// Show every pending tag change.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Push declared tags to every resource that differs.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Continue with the next resource after a failure.
        #[arg(long)]
        continue_on_error: bool,

        /// Only apply this resource.
        #[arg(short, long)]
        resource: Option<String>,

        /// Deadline for the remote calls of each resource, in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Show the tags currently stored on a resource.
    Show {
        /// Resource identifier.
        identifier: String,

        /// Service prefix (defaults to the configured one, then to the
        /// identifier's service segment).
        #[arg(short, long)]
        service: Option<String>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per log line.
    Json,
}
