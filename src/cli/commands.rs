//! CLI command definitions using clap.
//!
//! - run: execute one or more task configs
//! - validate: parse and check configs without calling any model
//! - summarize: TS/CS and token statistics over a result file

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Marble - run multi-agent LLM benchmark scenarios
#[derive(Parser, Debug)]
#[command(name = "marble")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Engine settings file (provider endpoints, default model)
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Log file requested by the run command, if any
    pub fn log_file(&self) -> Option<&PathBuf> {
        match &self.command {
            Commands::Run { log_file, .. } => log_file.as_ref(),
            _ => None,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run task configs (glob patterns accepted), one after another
    Run {
        /// Task config files (YAML or JSON)
        #[arg(required = true)]
        configs: Vec<String>,

        /// Ask the judge for feedback after every turn
        #[arg(short, long)]
        feedback: bool,

        /// Append logs to this file instead of stderr
        #[arg(short, long)]
        log_file: Option<PathBuf>,

        /// Write results here instead of each config's output.file_path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Parse and check task configs
    Validate {
        #[arg(required = true)]
        configs: Vec<String>,
    },

    /// Summarize a JSONL result file
    Summarize {
        /// Result file
        results: PathBuf,

        /// Metrics field whose numeric values are averaged (e.g. criteria)
        #[arg(short, long)]
        field: Option<String>,
    },
}
