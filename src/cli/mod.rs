//! CLI module for marble: argument parsing and subcommands.

pub mod commands;

pub use commands::Cli;
