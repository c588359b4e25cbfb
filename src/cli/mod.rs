//! CLI module for the Terraplane engine.
//!
//! This module provides the command-line interface for planning and
//! applying stack configurations.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
