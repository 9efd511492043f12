//! Timestamp alignment of export tables against the interval index.
//!
//! The upstream editor removes rows from the processed export, so its
//! local row order no longer matches the survey's interval numbering.
//! The companion interval-index table carries (timestamp, true interval,
//! exclusion flag) for every segmented ping group; intersecting the two
//! tables on sub-second timestamps restores true interval numbers.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use csv::ReaderBuilder;

use super::errors::{FormatError, Result};
use super::loaders::{parse_timestamp, ExportTable};
use super::warnings::{ContinuityWarning, WarningLog};

/// One retained row of the interval-index table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalEntry {
    pub timestamp: NaiveDateTime,
    pub interval: u32,
}

/// Interval-index table with excluded rows already discarded.
#[derive(Debug, Clone)]
pub struct IntervalIndex {
    pub path: PathBuf,
    /// Sorted by timestamp.
    pub entries: Vec<IntervalEntry>,
    /// Rows discarded because their exclusion flag was set.
    pub excluded: usize,
}

/// Load an interval-index table: `date, time, interval, exclude` rows.
///
/// Rows whose exclusion flag is nonzero are discarded; the remainder is
/// sorted by timestamp.
///
/// # Errors
///
/// Returns a `FormatError` if the file cannot be read or a field fails
/// to parse.
pub fn read_interval_index(path: &Path) -> Result<IntervalIndex> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let mut entries = Vec::with_capacity(1024);
    let mut excluded = 0usize;

    for (row_num, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() < 4 {
            return Err(FormatError::ShapeMismatch {
                path: path.to_path_buf(),
                row: row_num + 1,
                expected: 4,
                found: record.len(),
            });
        }

        let exclude: i64 = record[3].trim().parse().unwrap_or(0);
        if exclude != 0 {
            excluded += 1;
            continue;
        }

        let timestamp = parse_timestamp(&record[0], &record[1]).ok_or_else(|| {
            FormatError::BadTimestamp {
                path: path.to_path_buf(),
                row: row_num + 1,
                value: format!("{} {}", &record[0], &record[1]),
            }
        })?;

        let interval: u32 = record[2]
            .trim()
            .parse()
            .map_err(|_| FormatError::BadField {
                path: path.to_path_buf(),
                row: row_num + 1,
                field: "interval",
            })?;

        entries.push(IntervalEntry {
            timestamp,
            interval,
        });
    }

    entries.sort_by_key(|e| e.timestamp);

    Ok(IntervalIndex {
        path: path.to_path_buf(),
        entries,
        excluded,
    })
}

/// Re-key a table's rows with true interval numbers.
///
/// Both sides are sorted by timestamp and intersected with a two-pointer
/// walk on exact sub-second equality. Rows outside the intersection are
/// truncated away on both sides; a row-count mismatch against either
/// original is reported as a warning, never a failure.
///
/// # Returns
///
/// The surviving rows, re-keyed and sorted by interval.
///
/// # Errors
///
/// Returns `FormatError::EmptyIntersection` when a non-empty table shares
/// no timestamp with the index.
pub fn align_table(
    mut table: ExportTable,
    index: &IntervalIndex,
    warnings: &mut WarningLog,
) -> Result<ExportTable> {
    let table_rows = table.rows.len();
    if table_rows == 0 {
        return Ok(table);
    }

    table.rows.sort_by_key(|r| r.timestamp);

    let mut matched = Vec::with_capacity(table_rows.min(index.entries.len()));
    let mut i = 0usize;

    for mut row in table.rows.drain(..) {
        while i < index.entries.len() && index.entries[i].timestamp < row.timestamp {
            i += 1;
        }
        if i < index.entries.len() && index.entries[i].timestamp == row.timestamp {
            row.interval = index.entries[i].interval;
            matched.push(row);
            i += 1;
        }
    }

    if matched.is_empty() {
        return Err(FormatError::EmptyIntersection {
            path: table.path.clone(),
        });
    }

    let dropped_rows = table_rows - matched.len();
    let dropped_index = index.entries.len() - matched.len();
    if dropped_rows > 0 || dropped_index > 0 {
        warnings.push(ContinuityWarning::AlignmentDrop {
            table_rows: dropped_rows,
            index_rows: dropped_index,
        });
    }

    matched.sort_by_key(|r| r.interval);
    table.rows = matched;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExportConfig;
    use crate::core::loaders::read_export_table;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_index(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date,time,interval,exclude").unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn write_export(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "index,date,time,latitude,longitude,top_depth,bottom_depth,sample_count,v1,v2"
        )
        .unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_index_drops_excluded() {
        let file = write_index(&[
            "2019-07-14,12:00:01.250,10,0",
            "2019-07-14,12:00:02.250,11,1",
            "2019-07-14,12:00:03.250,12,0",
        ]);

        let index = read_interval_index(file.path()).unwrap();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.excluded, 1);
        assert_eq!(index.entries[0].interval, 10);
        assert_eq!(index.entries[1].interval, 12);
    }

    #[test]
    fn test_align_rekeys_by_timestamp() {
        let export = write_export(&[
            "0,2019-07-14,12:00:01.250,56.1,-152.3,0.0,10.0,2,-70.0,-71.0",
            "1,2019-07-14,12:00:03.250,56.3,-152.5,0.0,10.0,2,-50.0,-51.0",
        ]);
        let index = write_index(&[
            "2019-07-14,12:00:01.250,40,0",
            "2019-07-14,12:00:02.250,41,0",
            "2019-07-14,12:00:03.250,42,0",
        ]);

        let table = read_export_table(export.path(), &ExportConfig::default()).unwrap();
        let index = read_interval_index(index.path()).unwrap();
        let mut warnings = WarningLog::new();

        let aligned = align_table(table, &index, &mut warnings).unwrap();
        assert_eq!(aligned.rows.len(), 2);
        assert_eq!(aligned.rows[0].interval, 40);
        assert_eq!(aligned.rows[1].interval, 42);

        // Index row 41 had no export match: a drop warning fires.
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings.entries()[0].warning,
            ContinuityWarning::AlignmentDrop {
                table_rows: 0,
                index_rows: 1,
            }
        );
    }

    #[test]
    fn test_align_drops_unmatched_table_rows() {
        let export = write_export(&[
            "0,2019-07-14,12:00:01.250,56.1,-152.3,0.0,10.0,2,-70.0,-71.0",
            "1,2019-07-14,12:00:05.000,56.3,-152.5,0.0,10.0,2,-50.0,-51.0",
        ]);
        let index = write_index(&["2019-07-14,12:00:01.250,40,0"]);

        let table = read_export_table(export.path(), &ExportConfig::default()).unwrap();
        let index = read_interval_index(index.path()).unwrap();
        let mut warnings = WarningLog::new();

        let aligned = align_table(table, &index, &mut warnings).unwrap();
        assert_eq!(aligned.rows.len(), 1);
        assert_eq!(aligned.rows[0].interval, 40);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_empty_intersection_is_fatal() {
        let export = write_export(&[
            "0,2019-07-14,12:00:01.250,56.1,-152.3,0.0,10.0,2,-70.0,-71.0",
        ]);
        let index = write_index(&["2020-01-01,00:00:00.000,1,0"]);

        let table = read_export_table(export.path(), &ExportConfig::default()).unwrap();
        let index = read_interval_index(index.path()).unwrap();
        let mut warnings = WarningLog::new();

        let err = align_table(table, &index, &mut warnings).unwrap_err();
        assert!(matches!(err, FormatError::EmptyIntersection { .. }));
    }

    #[test]
    fn test_align_empty_table_passes_through() {
        let export = write_export(&[]);
        let index = write_index(&["2019-07-14,12:00:01.250,40,0"]);

        let table = read_export_table(export.path(), &ExportConfig::default()).unwrap();
        let index = read_interval_index(index.path()).unwrap();
        let mut warnings = WarningLog::new();

        let aligned = align_table(table, &index, &mut warnings).unwrap();
        assert!(aligned.rows.is_empty());
        assert!(warnings.is_empty());
    }
}
