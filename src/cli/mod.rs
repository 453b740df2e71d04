//! Command-line interface for calcache.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::config::DEFAULT_CONFIG_FILE;

/// calcache - caching proxy for arithmetic evaluation.
#[derive(Parser, Debug)]
#[command(name = "calcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Writes a default configuration file.
    Init {
        /// Target directory (default: current directory).
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Runs the computation server.
    Server {
        /// Listen host (overrides [server].host).
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides [server].port).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Runs the caching proxy.
    Proxy {
        /// Listen host (overrides [proxy].host).
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides [proxy].port).
        #[arg(short, long)]
        port: Option<u16>,

        /// Computation server host (overrides [upstream].host).
        #[arg(long)]
        server_host: Option<String>,

        /// Computation server port (overrides [upstream].port).
        #[arg(long)]
        server_port: Option<u16>,
    },

    /// Sends one expression to a proxy (or server) and prints the answer.
    Query {
        /// Expression to evaluate, e.g. "(1+2)*4".
        expression: String,

        /// Host to connect to (default: [proxy].host).
        #[arg(long)]
        host: Option<String>,

        /// Port to connect to (default: [proxy].port).
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not print the evaluation steps.
        #[arg(long)]
        no_steps: bool,

        /// Accept cached answers at most this old (seconds).
        #[arg(long)]
        max_age: Option<u64>,

        /// Keep the answer out of the proxy cache.
        #[arg(long)]
        no_store: bool,
    },

    /// Shows version.
    Version,
}
