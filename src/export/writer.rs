//! CSV and JSON writers for export batches.

use super::{ExportBatch, ExportFormat};
use crate::db::Value;
use crate::error::{HarnessError, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Writes a batch to `path` in the given format, creating parent directories.
pub fn write_export(batch: &ExportBatch, path: &Path, format: ExportFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            HarnessError::io(format!("Cannot create {}: {e}", parent.display()))
        })?;
    }

    let file = File::create(path)
        .map_err(|e| HarnessError::io(format!("Cannot write {}: {e}", path.display())))?;
    let writer = BufWriter::new(file);

    match format {
        ExportFormat::Csv => write_csv(batch, writer)?,
        ExportFormat::Json => write_json(batch, writer)?,
    }

    info!("Saved {} records to {}", batch.len(), path.display());
    Ok(())
}

/// Writes a header row in column order followed by one line per record.
pub fn write_csv<W: Write>(batch: &ExportBatch, writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);

    wtr.write_record(batch.columns())
        .map_err(|e| HarnessError::io(format!("CSV write failed: {e}")))?;

    for record in batch.records() {
        let cells: Vec<String> = record.values().map(csv_cell).collect();
        wtr.write_record(&cells)
            .map_err(|e| HarnessError::io(format!("CSV write failed: {e}")))?;
    }

    wtr.flush()
        .map_err(|e| HarnessError::io(format!("CSV write failed: {e}")))?;
    Ok(())
}

/// Writes the records as a pretty-printed JSON array of objects.
pub fn write_json<W: Write>(batch: &ExportBatch, mut writer: W) -> Result<()> {
    let rows: Vec<serde_json::Map<String, serde_json::Value>> = batch
        .records()
        .iter()
        .map(|record| {
            record
                .keys()
                .zip(record.values())
                .map(|(key, value)| (key.to_string(), value.to_json()))
                .collect()
        })
        .collect();

    serde_json::to_writer_pretty(&mut writer, &rows)
        .map_err(|e| HarnessError::io(format!("JSON write failed: {e}")))?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|e| HarnessError::io(format!("JSON write failed: {e}")))?;
    Ok(())
}

/// Scalars use their display form, nulls are empty, nested values are compact JSON.
fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::List(_) | Value::Map(_) => value.to_json().to_string(),
        _ => value.to_display_string(),
    }
}
