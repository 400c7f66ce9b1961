//! CLI module for the Convoy deployment tool.
//!
//! This module provides the command-line interface for planning, applying
//! and reconciling deployments.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;
