//! Read/write results JSON files.
//!
//! The schema is defined by `domain::ResultsFile`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::ResultsFile;
use crate::error::AppError;

/// Write a results JSON file (pretty-printed, trailing newline).
pub fn write_results_json(path: &Path, results: &ResultsFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create results JSON '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, results)
        .map_err(|e| AppError::input(format!("Failed to write results JSON: {e}")))?;
    writeln!(writer)
        .and_then(|_| writer.flush())
        .map_err(|e| AppError::input(format!("Failed to write results JSON: {e}")))?;

    Ok(())
}

/// Read a results JSON file.
pub fn read_results_json(path: &Path) -> Result<ResultsFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open results JSON '{}': {e}", path.display())))?;
    let results: ResultsFile =
        serde_json::from_reader(file).map_err(|e| AppError::input(format!("Invalid results JSON: {e}")))?;
    Ok(results)
}
