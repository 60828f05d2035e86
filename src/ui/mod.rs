//! UI module - Command Line Interface
//!
//! Subcommands, output loop and command-line quoting.

pub mod cli;
