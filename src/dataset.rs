use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::stage::{StageDefinition, Verification};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error("{} has no column named {column:?}", .path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error("{} row {row}: {value:?} in column {column:?} is not a number", .path.display())]
    NotNumeric {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },
    #[error("{} has no values in column {column:?}", .path.display())]
    Empty { path: PathBuf, column: String },
}

/// Path of a stage's dataset inside the data directory.
pub fn dataset_path(data_dir: &Path, stage: &StageDefinition) -> PathBuf {
    data_dir.join(stage.dataset_file)
}

/// Whether the stage's dataset file is present and can be offered for download.
pub fn dataset_exists(data_dir: &Path, stage: &StageDefinition) -> bool {
    dataset_path(data_dir, stage).is_file()
}

/// Reads a stage's dataset file verbatim, for download.
pub fn read_dataset_bytes(data_dir: &Path, stage: &StageDefinition) -> Result<Vec<u8>, DatasetError> {
    let path = dataset_path(data_dir, stage);
    std::fs::read(&path).map_err(|source| io_error(path, source))
}

/// Loads the numeric column a stage is scored on.
pub fn load_column(data_dir: &Path, stage: &StageDefinition) -> Result<Vec<f64>, DatasetError> {
    let path = dataset_path(data_dir, stage);
    let file = std::fs::File::open(&path).map_err(|source| io_error(path.clone(), source))?;
    parse_column(file, &path, stage.column)
}

/// Loads the stage's dataset and checks the submission against it. The aggregate is recomputed on
/// every call.
pub fn verify_submission(
    data_dir: &Path,
    stage: &StageDefinition,
    submitted: f64,
) -> Result<Verification, DatasetError> {
    let values = load_column(data_dir, stage)?;
    stage
        .verify(&values, submitted)
        .ok_or_else(|| DatasetError::Empty {
            path: dataset_path(data_dir, stage),
            column: stage.column.to_string(),
        })
}

/// Extracts a numeric column from CSV data with a header row. Blank cells are skipped; anything
/// else that fails to parse is an error.
pub fn parse_column(reader: impl Read, path: &Path, column: &str) -> Result<Vec<f64>, DatasetError> {
    let csv_error = |source: csv::Error| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let index = rdr
        .headers()
        .map_err(csv_error)?
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}') == column)
        .ok_or_else(|| DatasetError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })?;

    let mut values = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let cell = record.get(index).unwrap_or("");
        if cell.is_empty() {
            continue;
        }
        let value: f64 = cell.parse().map_err(|_| DatasetError::NotNumeric {
            path: path.to_path_buf(),
            // 1-based, counting the header line.
            row: i + 2,
            column: column.to_string(),
            value: cell.to_string(),
        })?;
        values.push(value);
    }
    Ok(values)
}

fn io_error(path: PathBuf, source: std::io::Error) -> DatasetError {
    if source.kind() == std::io::ErrorKind::NotFound {
        DatasetError::NotFound(path)
    } else {
        DatasetError::Io { path, source }
    }
}
