//! dbtour - runs the configured query tour against each backend.

mod cli;
mod logging;

use cli::Cli;
use db_tour::config::{BackendConfig, Config};
use db_tour::error::{HarnessError, Result};
use db_tour::harness::Harness;
use std::io::Write;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // A missing .env is fine; values already in the environment win.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();

    match &cli.log_file {
        Some(path) => logging::init_file_logging(path, &cli.log_level),
        None => logging::init_stderr_logging(&cli.log_level),
    }

    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    for backend in &mut config.backends {
        backend.connection.apply_env_overrides(&backend.name);
    }

    let selected = config.select(&cli.backends)?;

    let mut out = std::io::stdout();

    if cli.list {
        return list_backends(&selected, &mut out);
    }

    let harness = Harness::new(&cli.output_dir);
    let mut failures = Vec::new();

    for backend in selected {
        info!(
            "Running '{}' ({})",
            backend.name,
            backend.connection.display_string()
        );
        match harness.run(backend, &mut out).await {
            Ok(summary) => info!(
                "'{}' finished: {} queries, {} export files",
                summary.backend,
                summary.queries_run,
                summary.exports.len()
            ),
            Err(e) if cli.keep_going => {
                error!("{}: {}: {}", backend.name, e.category(), e);
                failures.push((backend.name.clone(), e));
            }
            Err(e) => return Err(e),
        }
        out.flush()
            .map_err(|e| HarnessError::io(format!("Cannot write to console: {e}")))?;
    }

    summarize_failures(failures)
}

/// Folds `--keep-going` failures into one error carrying the first
/// failure's category.
fn summarize_failures(failures: Vec<(String, HarnessError)>) -> Result<()> {
    let Some((_, first)) = failures.first() else {
        return Ok(());
    };
    let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
    Err(first.with_message(format!(
        "{} backend(s) failed: {}",
        failures.len(),
        names.join(", ")
    )))
}

fn list_backends<W: Write>(backends: &[&BackendConfig], out: &mut W) -> Result<()> {
    let write_err = |e: std::io::Error| HarnessError::io(format!("Cannot write to console: {e}"));

    for backend in backends {
        writeln!(
            out,
            "{} ({})",
            backend.name,
            backend.connection.display_string()
        )
        .map_err(write_err)?;
        for (i, query) in backend.queries.iter().enumerate() {
            writeln!(out, "  {}. {}", i + 1, query.label).map_err(write_err)?;
        }
        for export in &backend.exports {
            writeln!(out, "  -> {}", export.path.display()).map_err(write_err)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_failures_is_ok() {
        assert!(summarize_failures(Vec::new()).is_ok());
    }

    #[test]
    fn test_failures_keep_first_category() {
        let failures = vec![
            (
                "neo4j".to_string(),
                HarnessError::connection("Cannot connect to localhost:7687"),
            ),
            ("postgres".to_string(), HarnessError::query("syntax error")),
        ];

        let err = summarize_failures(failures).unwrap_err();
        assert!(matches!(err, HarnessError::Connection(_)));
        assert_eq!(err.category(), "Connection Error");
        assert_eq!(
            err.to_string(),
            "Connection error: 2 backend(s) failed: neo4j, postgres"
        );
    }
}
