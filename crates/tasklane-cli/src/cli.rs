//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Treat payload arguments as hex
    #[arg(long)]
    pub hex: bool,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Worker the commands run in
    #[arg(short, long, default_value_t = 0)]
    pub worker: u16,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit fire-and-forget tasks and print their results as they finish
    Submit {
        /// Task payloads
        #[arg(required = true)]
        payloads: Vec<String>,
        /// Target task worker (pool index); round-robin when omitted
        #[arg(short, long)]
        dst: Option<usize>,
        /// How long to collect results for
        #[arg(long, default_value_t = 1000)]
        collect_ms: u64,
    },
    /// Run one task and wait for its result
    WaitOne {
        /// Task payload
        payload: String,
        /// Target task worker (pool index); round-robin when omitted
        #[arg(short, long)]
        dst: Option<usize>,
        /// Timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
    /// Run a batch of tasks and wait for all of them
    WaitAll {
        /// Task payloads, in request order
        #[arg(required = true)]
        payloads: Vec<String>,
        /// Timeout in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,
        /// Simulate a full pool for these request indices
        #[arg(long)]
        fail_index: Vec<usize>,
    },
    /// Print the effective configuration
    Config,
}
