//! The generic query-and-export run for one backend.
//!
//! A run connects, prints a banner, executes and renders each query, builds
//! every export batch, writes the export files and prints the summary. The
//! backend is closed exactly once whether or not the run succeeds.

use std::io::Write;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::BackendConfig;
use crate::db::{self, Backend};
use crate::error::{HarnessError, Result};
use crate::export::{self, ExportBatch, ExportFormat};
use crate::query::QueryExecutor;

/// Width of the banner and separator rules.
const RULE_WIDTH: usize = 80;

/// What a completed run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Backend name.
    pub backend: String,
    /// Number of console queries executed.
    pub queries_run: usize,
    /// Files written and their record counts, in export order.
    pub exports: Vec<(PathBuf, usize)>,
}

/// Drives configured backends, writing console output to a caller-supplied
/// writer and export files under an output directory.
#[derive(Debug, Clone)]
pub struct Harness {
    output_dir: PathBuf,
}

impl Harness {
    /// Creates a harness writing export files under `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Connects to the configured backend and runs it.
    pub async fn run<W: Write + Send>(
        &self,
        config: &BackendConfig,
        out: &mut W,
    ) -> Result<RunSummary> {
        let backend = db::connect(&config.connection).await?;
        self.run_connected(backend, config, out).await
    }

    /// Runs an already-connected backend and closes it.
    ///
    /// A close failure after a successful run is returned; after a failed run
    /// it is logged and the run's error is returned.
    pub async fn run_connected<W: Write + Send>(
        &self,
        backend: Box<dyn Backend>,
        config: &BackendConfig,
        out: &mut W,
    ) -> Result<RunSummary> {
        let outcome = self.run_with(backend.as_ref(), config, out).await;
        let closed = backend.close().await;

        match (outcome, closed) {
            (Ok(summary), Ok(())) => {
                info!("Closed {} backend '{}'", backend.kind(), config.name);
                Ok(summary)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!("Failed to close '{}' after error: {close_err}", config.name);
                Err(e)
            }
        }
    }

    async fn run_with<W: Write + Send>(
        &self,
        backend: &dyn Backend,
        config: &BackendConfig,
        out: &mut W,
    ) -> Result<RunSummary> {
        let executor = QueryExecutor::new(backend);
        let rule = "=".repeat(RULE_WIDTH);
        let thin_rule = "-".repeat(RULE_WIDTH);

        let title = config
            .title
            .clone()
            .unwrap_or_else(|| format!("{} QUERIES", config.name.to_uppercase()));
        writeln!(out, "{rule}\n{title}\n{rule}").map_err(console_error)?;

        for (i, spec) in config.queries.iter().enumerate() {
            writeln!(out, "\nQuery {}: {}\n{thin_rule}", i + 1, spec.label).map_err(console_error)?;

            let outcome = executor.execute(spec).await?;
            for line in backend.render(spec, &outcome.result)? {
                writeln!(out, "{line}").map_err(console_error)?;
            }
        }

        // Every batch is assembled before the first file is written, so a
        // failing export query leaves no files behind.
        let mut batches: Vec<(PathBuf, ExportFormat, ExportBatch)> =
            Vec::with_capacity(config.exports.len());
        if !config.exports.is_empty() {
            writeln!(out, "\nExporting query results...").map_err(console_error)?;
        }
        for spec in &config.exports {
            let mut batch = ExportBatch::new(spec.column_names());
            for query in &spec.queries {
                let outcome = executor.execute(query).await?;
                batch.extend(export::project(&spec.columns, query, &outcome.result))?;
            }
            batches.push((self.output_dir.join(&spec.path), spec.resolved_format()?, batch));
        }

        let mut exports = Vec::with_capacity(batches.len());
        for (path, format, batch) in batches {
            export::write_export(&batch, &path, format)?;
            writeln!(out, "✓ Saved: {} ({} records)", path.display(), batch.len())
                .map_err(console_error)?;
            exports.push((path, batch.len()));
        }

        if !config.summary.is_empty() {
            writeln!(out, "\n{rule}").map_err(console_error)?;
            for line in &config.summary {
                writeln!(out, "{line}").map_err(console_error)?;
            }
            writeln!(out, "{rule}").map_err(console_error)?;
        }

        Ok(RunSummary {
            backend: config.name.clone(),
            queries_run: config.queries.len(),
            exports,
        })
    }
}

fn console_error(e: std::io::Error) -> HarnessError {
    HarnessError::io(format!("Cannot write to console: {e}"))
}
