//! Logging configuration for dbtour.
//!
//! Logs go to stderr so they never interleave with the rendered results on
//! stdout, or to a file when one is given. `RUST_LOG` takes precedence over
//! the level passed on the command line.

use std::fs::{self, File};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` if set and valid, else `level`.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initializes logging to stderr.
pub fn init_stderr_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .init();
}

/// Initializes logging to a file, falling back to stderr if the file cannot
/// be created.
pub fn init_file_logging(path: &Path, level: &str) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("Warning: Could not create log directory: {e}");
            init_stderr_logging(level);
            return;
        }
    }

    let log_file = match File::create(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {e}");
            init_stderr_logging(level);
            return;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(log_file)
        .with_ansi(false)
        .init();
}
