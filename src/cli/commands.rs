//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: ingest events and serve the API (the default)
//! - calls list: page through recorded calls
//! - calls show: print one call

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Callsink - records call lifecycles from a FreeSWITCH event socket
#[derive(Parser, Debug)]
#[command(name = "callsink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the event socket, record calls and serve the API
    Run,

    /// Read recorded calls from the local database
    Calls {
        #[command(subcommand)]
        command: CallsCommands,
    },
}

/// Offline queries against the call store
#[derive(Subcommand, Debug, Clone)]
pub enum CallsCommands {
    /// List calls, newest first
    List {
        /// Maximum number of calls to show
        #[arg(short, long, default_value_t = 10)]
        limit: u32,

        /// Number of calls to skip
        #[arg(short, long, default_value_t = 0)]
        offset: u32,
    },

    /// Show a single call
    Show {
        /// Call uuid (Unique-ID)
        uuid: String,
    },
}
