//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// StepGraph CLI - durable state-graph demos
#[derive(Parser)]
#[command(name = "stepgraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Graph configuration file (toml, yaml or json); STEPGRAPH_* env vars override it
    #[arg(short = 'c', long, global = true, env = "STEPGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Self-looping counter that stops at a limit
    Counter {
        /// Number of increments before the router picks the terminal edge
        #[arg(short, long, default_value_t = 3)]
        limit: i64,

        /// Print every engine event while running
        #[arg(short, long)]
        stream: bool,
    },

    /// Propose an action, pause for approval, then execute or cancel it
    Approval {
        /// Reject the proposed action instead of approving it
        #[arg(long)]
        reject: bool,

        /// Reviewer note written into the state before resuming
        #[arg(short, long)]
        note: Option<String>,
    },

    /// Conversation memory kept per session
    Chat {
        /// Session ids; every message is sent to each session in turn
        #[arg(short, long, value_delimiter = ',', default_values_t = [String::from("a"), String::from("b")])]
        sessions: Vec<String>,

        /// User messages
        #[arg(required = true)]
        messages: Vec<String>,
    },

    /// Print the effective graph configuration
    Config,
}
