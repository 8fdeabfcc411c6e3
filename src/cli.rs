//! Command-line argument parsing for dbtour.

use clap::Parser;
use std::path::PathBuf;

/// Runs canned queries against vector, document, graph and relational
/// databases and exports the results to CSV and JSON.
#[derive(Parser, Debug)]
#[command(name = "dbtour")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path (defaults to the user config file, then the built-in MovieLens tour)
    #[arg(long, value_name = "PATH", env = "DBTOUR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run only this backend (repeatable; default: all, in file order)
    #[arg(short = 'b', long = "backend", value_name = "NAME")]
    pub backends: Vec<String>,

    /// Directory for export files
    #[arg(short = 'o', long, value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// List configured backends and queries, then exit
    #[arg(long)]
    pub list: bool,

    /// Continue with the next backend after a failure
    #[arg(long)]
    pub keep_going: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
