//! Fatal error taxonomy for batch ingestion.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort the current file batch.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Canonical export has no rows left after deduplication.
    #[error("no usable rows in export: {}", .0.display())]
    EmptyExport(PathBuf),

    /// A row declared more payload samples than it carries.
    #[error("row {row} of '{}' declares {expected} samples but carries {found}", .path.display())]
    ShapeMismatch {
        path: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },

    /// A date or time field could not be parsed.
    #[error("bad timestamp in row {row} of '{}': {value}", .path.display())]
    BadTimestamp {
        path: PathBuf,
        row: usize,
        value: String,
    },

    /// A numeric identification field could not be parsed.
    #[error("bad field '{field}' in row {row} of '{}'", .path.display())]
    BadField {
        path: PathBuf,
        row: usize,
        field: &'static str,
    },

    /// Timestamp intersection between a table and the interval index is empty.
    #[error("no timestamps of '{}' match the interval index", .path.display())]
    EmptyIntersection { path: PathBuf },

    /// A batch ends before data already folded into the grid.
    #[error("out-of-order ingestion: batch ends at interval {batch_max} but the grid already reaches {previous_last}")]
    OutOfOrderBatch { previous_last: u32, batch_max: u32 },

    /// A required export file is missing from the batch.
    #[error("missing required {kind} export for channel '{channel}' in set '{set}'")]
    MissingExport {
        set: String,
        channel: String,
        kind: &'static str,
    },
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, FormatError>;
