//! CLI module for vigil - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the
//! scheduler, projecting the schedule and validating configuration.

pub mod commands;

pub use commands::Cli;
