//! Readers and normalizers for acoustic export tables.
//!
//! This module provides parsers for:
//! - Echo-integration export tables (one row per interval, one payload
//!   column per depth layer)
//! - Background-noise tables (one value per interval)
//!
//! Sentinel encodings used by the upstream exporter ("no data" floors and
//! magic dB values) are converted to NaN here, at the boundary, so no
//! downstream component repeats sentinel comparisons.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::ReaderBuilder;
use rayon::prelude::*;

use crate::config::ExportConfig;

use super::errors::{FormatError, Result};

/// Number of identification columns before the payload block:
/// index, date, time, latitude, longitude, top_depth, bottom_depth,
/// sample_count.
const ID_COLUMNS: usize = 8;

/// Key of one acoustic measurement cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    /// Survey interval number (time axis unit).
    pub interval: u32,
    /// Depth-bin index within the interval, 1-based.
    pub layer: u32,
}

impl CellKey {
    pub fn new(interval: u32, layer: u32) -> Self {
        Self { interval, layer }
    }
}

/// One keyed payload value from one export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub key: CellKey,
    pub value: f64,
}

/// Measurement kind carried by a source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Processed (cleaned) mean value; the canonical stream.
    SvMean,
    /// Unfiltered mean value.
    SvRaw,
    /// Sample count before upstream cleaning.
    RawCount,
    /// Sample count retained after upstream cleaning.
    KeptCount,
    /// Signal-to-noise ratio.
    SignalNoise,
    /// Background noise, one value per interval.
    BackgroundNoise,
    /// Motion-correction mean.
    Motion,
    Skewness,
    Kurtosis,
    StdDev,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamKind::SvMean => "processed mean",
            StreamKind::SvRaw => "raw mean",
            StreamKind::RawCount => "raw count",
            StreamKind::KeptCount => "kept count",
            StreamKind::SignalNoise => "signal-to-noise",
            StreamKind::BackgroundNoise => "background noise",
            StreamKind::Motion => "motion correction",
            StreamKind::Skewness => "skewness",
            StreamKind::Kurtosis => "kurtosis",
            StreamKind::StdDev => "standard deviation",
        };
        write!(f, "{}", name)
    }
}

/// Cell-key-ordered samples from one (channel, file, kind) export.
#[derive(Debug, Clone)]
pub struct SourceStream {
    pub kind: StreamKind,
    /// Sorted by cell key; keys are unique.
    pub samples: Vec<Sample>,
}

impl SourceStream {
    /// Number of samples in the stream.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the stream carries no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One deduplicated export row with parsed identification columns.
#[derive(Debug, Clone)]
pub struct ExportRow {
    /// Survey interval number. Starts as the local row ordinal; the
    /// aligner rewrites it with the true interval from the index table.
    pub interval: u32,
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    /// Depth of the shallowest bin boundary in meters.
    pub top_depth: f64,
    /// Depth of the deepest bin boundary in meters.
    pub bottom_depth: f64,
    /// Payload values shallow-to-deep, sentinels already mapped to NaN.
    pub samples: Vec<f64>,
}

impl ExportRow {
    /// Vertical extent of one depth bin in meters.
    pub fn layer_height(&self) -> f64 {
        let n = self.samples.len();
        if n == 0 {
            return f64::NAN;
        }
        (self.bottom_depth - self.top_depth) / n as f64
    }

    /// Nominal mid-bin depth of a 1-based layer.
    pub fn layer_depth(&self, layer: u32) -> f64 {
        self.top_depth + (layer as f64 - 0.5) * self.layer_height()
    }
}

/// Parsed export table plus reader statistics.
#[derive(Debug, Clone)]
pub struct ExportTable {
    pub path: PathBuf,
    /// Deduplicated rows in file order.
    pub rows: Vec<ExportRow>,
    /// Exact duplicate rows discarded during parsing.
    pub duplicates_removed: usize,
    /// Sentinel payload values mapped to NaN.
    pub sentinels_mapped: usize,
}

impl ExportTable {
    /// Total number of payload cells across all rows.
    pub fn cell_count(&self) -> usize {
        self.rows.iter().map(|r| r.samples.len()).sum()
    }

    /// Largest per-row layer count.
    pub fn max_layers(&self) -> usize {
        self.rows.iter().map(|r| r.samples.len()).max().unwrap_or(0)
    }
}

/// Parse a date + time column pair into a sub-second timestamp.
pub(crate) fn parse_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S%.f").ok()?;
    Some(NaiveDateTime::new(date, time))
}

/// Load one export table from CSV.
///
/// The expected layout is a header row followed by data rows of
/// `index, date, time, latitude, longitude, top_depth, bottom_depth,
/// sample_count, v1..vp` with payload columns ordered shallow-to-deep.
///
/// Rows that are exact duplicates of an earlier row in every column but
/// the leading `index` are discarded (first occurrence kept). Payload
/// values at or below `config.sentinel_floor_db`, or exactly equal to
/// `config.sentinel_db`, are replaced with NaN.
///
/// # Arguments
///
/// * `path` - Path to the export CSV
/// * `config` - Sentinel encodings of the upstream exporter
///
/// # Returns
///
/// The deduplicated, normalized table. A file with no data rows yields an
/// empty table, not an error.
///
/// # Errors
///
/// Returns a `FormatError` if the file cannot be read, a row carries
/// fewer payload columns than its declared `sample_count`, or an
/// identification column fails to parse.
pub fn read_export_table(path: &Path, config: &ExportConfig) -> Result<ExportTable> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut rows: Vec<ExportRow> = Vec::with_capacity(1024);
    let mut seen: HashSet<String> = HashSet::with_capacity(1024);
    let mut duplicates_removed = 0usize;

    for (row_num, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() < ID_COLUMNS {
            return Err(FormatError::ShapeMismatch {
                path: path.to_path_buf(),
                row: row_num + 1,
                expected: ID_COLUMNS,
                found: record.len(),
            });
        }

        // Dedup on every column except the leading row index.
        let dedup_key = record.iter().skip(1).collect::<Vec<_>>().join("\x1f");
        if !seen.insert(dedup_key) {
            duplicates_removed += 1;
            continue;
        }

        let timestamp = parse_timestamp(&record[1], &record[2]).ok_or_else(|| {
            FormatError::BadTimestamp {
                path: path.to_path_buf(),
                row: row_num + 1,
                value: format!("{} {}", &record[1], &record[2]),
            }
        })?;

        let parse_f64 = |idx: usize, field: &'static str| -> Result<f64> {
            record[idx]
                .trim()
                .parse()
                .map_err(|_| FormatError::BadField {
                    path: path.to_path_buf(),
                    row: row_num + 1,
                    field,
                })
        };

        let latitude = parse_f64(3, "latitude")?;
        let longitude = parse_f64(4, "longitude")?;
        let top_depth = parse_f64(5, "top_depth")?;
        let bottom_depth = parse_f64(6, "bottom_depth")?;

        let sample_count: usize =
            record[7]
                .trim()
                .parse()
                .map_err(|_| FormatError::BadField {
                    path: path.to_path_buf(),
                    row: row_num + 1,
                    field: "sample_count",
                })?;

        let payload_cols = record.len() - ID_COLUMNS;
        if payload_cols < sample_count {
            return Err(FormatError::ShapeMismatch {
                path: path.to_path_buf(),
                row: row_num + 1,
                expected: sample_count,
                found: payload_cols,
            });
        }

        // Unparseable payload cells degrade to NaN rather than aborting.
        let samples: Vec<f64> = (0..sample_count)
            .map(|i| {
                record[ID_COLUMNS + i]
                    .trim()
                    .parse()
                    .unwrap_or(f64::NAN)
            })
            .collect();

        rows.push(ExportRow {
            interval: rows.len() as u32,
            timestamp,
            latitude,
            longitude,
            top_depth,
            bottom_depth,
            samples,
        });
    }

    // Sentinel normalization; ordering is untouched so the parallel pass
    // stays deterministic.
    let floor = config.sentinel_floor_db;
    let sentinel = config.sentinel_db;
    let sentinels_mapped: usize = rows
        .par_iter_mut()
        .map(|row| {
            let mut mapped = 0usize;
            for v in &mut row.samples {
                if v.is_finite() && (*v <= floor || *v == sentinel) {
                    *v = f64::NAN;
                    mapped += 1;
                }
            }
            mapped
        })
        .sum();

    Ok(ExportTable {
        path: path.to_path_buf(),
        rows,
        duplicates_removed,
        sentinels_mapped,
    })
}

/// Load a background-noise table: `interval, noise` rows, one value per
/// interval, consumed at the configured row stride.
///
/// # Errors
///
/// Returns a `FormatError` if the file cannot be read or an interval
/// field fails to parse.
pub fn read_noise_table(path: &Path, stride: usize) -> Result<Vec<Sample>> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let stride = stride.max(1);
    let mut samples = Vec::with_capacity(256);

    for (row_num, result) in reader.records().enumerate() {
        if row_num % stride != 0 {
            continue;
        }
        let record = result?;
        if record.len() < 2 {
            return Err(FormatError::ShapeMismatch {
                path: path.to_path_buf(),
                row: row_num + 1,
                expected: 2,
                found: record.len(),
            });
        }

        let interval: u32 = record[0]
            .trim()
            .parse()
            .map_err(|_| FormatError::BadField {
                path: path.to_path_buf(),
                row: row_num + 1,
                field: "interval",
            })?;
        let value: f64 = record[1].trim().parse().unwrap_or(f64::NAN);

        samples.push(Sample {
            key: CellKey::new(interval, 1),
            value,
        });
    }

    samples.sort_by_key(|s| s.key);
    Ok(samples)
}

/// Flatten a table into a cell-key-sorted source stream.
///
/// Each row becomes `sample_count` samples keyed by (interval, layer)
/// with layers numbered 1..p shallow-to-deep. Call after alignment so the
/// keys carry true interval numbers.
pub fn flatten_table(table: &ExportTable, kind: StreamKind) -> SourceStream {
    let mut samples: Vec<Sample> = table
        .rows
        .iter()
        .flat_map(|row| {
            row.samples.iter().enumerate().map(move |(i, &value)| Sample {
                key: CellKey::new(row.interval, i as u32 + 1),
                value,
            })
        })
        .collect();

    samples.sort_by_key(|s| s.key);
    SourceStream { kind, samples }
}
