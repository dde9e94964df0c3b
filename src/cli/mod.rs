//! CLI module for stackform.
//!
//! This module provides the command-line interface for planning and
//! applying declared stacks.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
