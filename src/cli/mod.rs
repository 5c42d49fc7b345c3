//! CLI module for callsink - command-line interface and subcommands.
//!
//! Provides the main entry point with the `run` service command and the
//! offline `calls` queries, plus plain-text rendering of call records.

pub mod commands;
pub mod render;

pub use commands::Cli;
