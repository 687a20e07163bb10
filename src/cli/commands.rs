//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: build the schedule and enter the dispatch loop
//! - projection: print scheduling information and tuning suggestions
//! - check-config: validate the configuration file and exit

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vigil - a host and service check scheduling engine
#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

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
    /// Build the check schedule and run the dispatch loop
    Run {
        /// Host and service definitions (YAML)
        #[arg(short, long)]
        objects: Option<PathBuf>,
    },

    /// Show projected scheduling information without running
    Projection {
        /// Host and service definitions (YAML)
        #[arg(short, long)]
        objects: Option<PathBuf>,
    },

    /// Validate the configuration file and exit
    CheckConfig,
}
