//! Tasklane CLI library
//!
//! Command-line driver that runs the task API against an in-process cluster,
//! for trying out dispatch, single waits and wait-all batches by hand.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::{CommandDispatcher, PayloadView};
pub use config::{AppConfig, CliConfig};
pub use error::{CliError, Result};
