//! CLI module for the tagsync tool.
//!
//! This module provides the command-line interface for planning and
//! applying declared resource tags.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat};
pub use output::OutputFormatter;
