//! N-way sorted merge of the canonical stream with auxiliary streams.
//!
//! The canonical (processed mean) table drives the merge: for every one
//! of its cell keys a cursor is advanced through each auxiliary stream
//! with the two-pointer rule "advance while the auxiliary key is below
//! the target, then test equality". Auxiliary kinds missing a key yield
//! NaN plus a continuity warning. Derived quantities (percent-good, dB
//! conversion, motion remap) and the quality gate are applied here so the
//! grid only ever sees surviving cells.

use chrono::NaiveDateTime;

use crate::config::{ChannelConfig, QualityConfig};
use crate::core::loaders::{CellKey, ExportTable, Sample, SourceStream, StreamKind};
use crate::core::warnings::{ContinuityWarning, WarningLog};

/// dB readings at or above this value encode "no data".
pub const DB_CEILING: f64 = 999.0;

/// Convert a dB reading to the linear domain.
///
/// An exact-zero reading is the exporter's "no data" sentinel and maps to
/// NaN rather than linear 1.0; readings at or above [`DB_CEILING`] map to
/// NaN as well. Everything else converts to `10^(v/10)`.
pub fn db_to_linear(db: f64) -> f64 {
    if !db.is_finite() || db == 0.0 || db >= DB_CEILING {
        f64::NAN
    } else {
        10f64.powf(db / 10.0)
    }
}

/// Fraction of raw samples retained after upstream cleaning, in [0, 100].
///
/// Zero when `raw` is non-positive; NaN when either count is missing.
pub fn percent_good(retained: f64, raw: f64) -> f64 {
    if retained.is_nan() || raw.is_nan() {
        return f64::NAN;
    }
    if raw <= 0.0 {
        return 0.0;
    }
    (100.0 * retained / raw).floor().clamp(0.0, 100.0)
}

/// Remap a motion-correction mean to a correction percentage.
///
/// A raw zero reading means "not computed" and maps to NaN first.
pub fn motion_percent(mean_db: f64) -> f64 {
    if !mean_db.is_finite() || mean_db == 0.0 {
        f64::NAN
    } else {
        100.0 * 10f64.powf(mean_db / 10.0) - 100.0
    }
}

/// Forward-only cursor over a sorted sample slice, parameterized by the
/// key extractor so the same primitive serves cell-keyed and
/// interval-keyed streams.
pub struct MergeCursor<'a, K, F>
where
    K: Ord + Copy,
    F: Fn(&Sample) -> K,
{
    samples: &'a [Sample],
    pos: usize,
    key_of: F,
}

impl<'a, K, F> MergeCursor<'a, K, F>
where
    K: Ord + Copy,
    F: Fn(&Sample) -> K,
{
    pub fn new(samples: &'a [Sample], key_of: F) -> Self {
        Self {
            samples,
            pos: 0,
            key_of,
        }
    }

    /// Advance to `target` and return its value if the stream has it.
    ///
    /// Targets must be presented in non-decreasing order; the cursor
    /// never rewinds.
    pub fn seek(&mut self, target: K) -> Option<f64> {
        while self.pos < self.samples.len() && (self.key_of)(&self.samples[self.pos]) < target {
            self.pos += 1;
        }
        match self.samples.get(self.pos) {
            Some(s) if (self.key_of)(s) == target => Some(s.value),
            _ => None,
        }
    }
}

/// Cursor keyed by full cell key.
pub type CellCursor<'a> = MergeCursor<'a, CellKey, fn(&Sample) -> CellKey>;

/// Cursor keyed by interval only (layer ignored).
pub type IntervalCursor<'a> = MergeCursor<'a, u32, fn(&Sample) -> u32>;

fn cell_key(s: &Sample) -> CellKey {
    s.key
}

fn interval_key(s: &Sample) -> u32 {
    s.key.interval
}

/// Auxiliary inputs to one channel merge; any subset may be absent.
#[derive(Debug, Default)]
pub struct AuxStreams {
    pub sv_raw: Option<SourceStream>,
    pub raw_count: Option<SourceStream>,
    pub kept_count: Option<SourceStream>,
    pub snr: Option<SourceStream>,
    pub motion: Option<SourceStream>,
    pub skewness: Option<SourceStream>,
    pub kurtosis: Option<SourceStream>,
    pub std_dev: Option<SourceStream>,
    /// Interval-keyed background noise samples.
    pub noise: Option<Vec<Sample>>,
}

/// One surviving cell with every merged field.
#[derive(Debug, Clone, Copy)]
pub struct FusedCell {
    pub key: CellKey,
    /// Processed mean in the linear domain.
    pub sv_mean: f64,
    /// Unfiltered mean in the linear domain.
    pub sv_raw: f64,
    pub percent_good: f64,
    /// Signal-to-noise ratio, dB as exported.
    pub snr: f64,
    /// Motion-correction percentage.
    pub motion: f64,
    /// Nominal mid-bin depth in meters.
    pub depth: f64,
    /// Vertical bin extent in meters.
    pub height: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub std_dev: f64,
}

/// Timestamp and position of one interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalMeta {
    pub interval: u32,
    pub timestamp: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
}

/// Merge output for one (channel, file) pair, ready to fold into the grid.
#[derive(Debug, Default)]
pub struct FusedBatch {
    /// Ascending by interval, one entry per canonical row.
    pub intervals: Vec<IntervalMeta>,
    /// Cell-key-ordered surviving cells.
    pub cells: Vec<FusedCell>,
    /// Per-interval background noise values that were present.
    pub noise: Vec<(u32, f64)>,
}

impl FusedBatch {
    /// Smallest and largest interval covered, if any.
    pub fn interval_range(&self) -> Option<(u32, u32)> {
        match (self.intervals.first(), self.intervals.last()) {
            (Some(a), Some(b)) => Some((a.interval, b.interval)),
            _ => None,
        }
    }

    /// Largest layer index among surviving cells.
    pub fn max_layer(&self) -> u32 {
        self.cells.iter().map(|c| c.key.layer).max().unwrap_or(0)
    }
}

fn stream_cursor(s: &Option<SourceStream>) -> Option<CellCursor<'_>> {
    s.as_ref()
        .map(|s| CellCursor::new(&s.samples, cell_key as fn(&Sample) -> CellKey))
}

fn lookup(
    cursor: &mut Option<CellCursor<'_>>,
    kind: StreamKind,
    key: CellKey,
    pending: &mut Vec<ContinuityWarning>,
) -> f64 {
    match cursor {
        Some(c) => match c.seek(key) {
            Some(v) => v,
            None => {
                pending.push(ContinuityWarning::MissingAuxCell {
                    kind,
                    interval: key.interval,
                    layer: key.layer,
                });
                f64::NAN
            }
        },
        None => f64::NAN,
    }
}

/// Merge one channel's canonical table with its auxiliary streams.
///
/// The canonical table must already be aligned (rows sorted by true
/// interval number). Cells beyond the channel's depth cutoff are dropped
/// before any auxiliary lookup; cells whose percent-good is a number
/// below the quality minimum are dropped after, and their would-be
/// missing-key warnings are discarded with them.
///
/// # Returns
///
/// A [`FusedBatch`] whose `cells` are in cell-key order.
pub fn merge_channel(
    canonical: &ExportTable,
    aux: &AuxStreams,
    channel: &ChannelConfig,
    quality: &QualityConfig,
    extended: bool,
    warnings: &mut WarningLog,
) -> FusedBatch {
    let mut sv_raw = stream_cursor(&aux.sv_raw);
    let mut raw_count = stream_cursor(&aux.raw_count);
    let mut kept_count = stream_cursor(&aux.kept_count);
    let mut snr = stream_cursor(&aux.snr);
    let mut motion = stream_cursor(&aux.motion);
    let mut skewness = if extended {
        stream_cursor(&aux.skewness)
    } else {
        None
    };
    let mut kurtosis = if extended {
        stream_cursor(&aux.kurtosis)
    } else {
        None
    };
    let mut std_dev = if extended {
        stream_cursor(&aux.std_dev)
    } else {
        None
    };
    let mut noise = aux
        .noise
        .as_deref()
        .map(|s| IntervalCursor::new(s, interval_key as fn(&Sample) -> u32));

    let mut batch = FusedBatch::default();
    let mut pending: Vec<ContinuityWarning> = Vec::new();

    for row in &canonical.rows {
        batch.intervals.push(IntervalMeta {
            interval: row.interval,
            timestamp: row.timestamp,
            latitude: row.latitude,
            longitude: row.longitude,
        });

        if let Some(cur) = &mut noise {
            match cur.seek(row.interval) {
                Some(v) => batch.noise.push((row.interval, v)),
                None => warnings.push(ContinuityWarning::MissingAuxCell {
                    kind: StreamKind::BackgroundNoise,
                    interval: row.interval,
                    layer: 0,
                }),
            }
        }

        let height = row.layer_height();

        for (i, &sv_db) in row.samples.iter().enumerate() {
            let layer = i as u32 + 1;
            let key = CellKey::new(row.interval, layer);
            let depth = row.layer_depth(layer);

            // Layers beyond the channel cutoff never consult the
            // auxiliary streams, so they cannot flood the warning log.
            if depth > channel.max_depth_m {
                continue;
            }

            pending.clear();

            let raw_db = lookup(&mut sv_raw, StreamKind::SvRaw, key, &mut pending);
            let raw = lookup(&mut raw_count, StreamKind::RawCount, key, &mut pending);
            let kept = lookup(&mut kept_count, StreamKind::KeptCount, key, &mut pending);
            let snr_db = lookup(&mut snr, StreamKind::SignalNoise, key, &mut pending);
            let motion_db = lookup(&mut motion, StreamKind::Motion, key, &mut pending);
            let skew = lookup(&mut skewness, StreamKind::Skewness, key, &mut pending);
            let kurt = lookup(&mut kurtosis, StreamKind::Kurtosis, key, &mut pending);
            let std = lookup(&mut std_dev, StreamKind::StdDev, key, &mut pending);

            let pg = percent_good(kept, raw);
            if !pg.is_nan() && pg < quality.min_percent_good {
                continue;
            }

            for w in pending.drain(..) {
                warnings.push(w);
            }

            batch.cells.push(FusedCell {
                key,
                sv_mean: db_to_linear(sv_db),
                sv_raw: db_to_linear(raw_db),
                percent_good: pg,
                snr: snr_db,
                motion: motion_percent(motion_db),
                depth,
                height,
                skewness: skew,
                kurtosis: kurt,
                std_dev: std,
            });
        }
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::loaders::ExportRow;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn ts(secs: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 7, 14)
            .unwrap()
            .and_hms_opt(12, 0, secs)
            .unwrap()
    }

    fn row(interval: u32, values: &[f64]) -> ExportRow {
        ExportRow {
            interval,
            timestamp: ts(interval % 60),
            latitude: 56.0,
            longitude: -152.0,
            top_depth: 0.0,
            bottom_depth: 10.0 * values.len() as f64,
            samples: values.to_vec(),
        }
    }

    fn table(rows: Vec<ExportRow>) -> ExportTable {
        ExportTable {
            path: PathBuf::from("test.csv"),
            rows,
            duplicates_removed: 0,
            sentinels_mapped: 0,
        }
    }

    fn stream(kind: StreamKind, samples: &[(u32, u32, f64)]) -> SourceStream {
        SourceStream {
            kind,
            samples: samples
                .iter()
                .map(|&(i, l, v)| Sample {
                    key: CellKey::new(i, l),
                    value: v,
                })
                .collect(),
        }
    }

    fn lenient_quality() -> QualityConfig {
        QualityConfig {
            min_percent_good: 0.0,
            min_good_cells: 1,
        }
    }

    #[test]
    fn test_db_to_linear_domain() {
        assert!(db_to_linear(0.0).is_nan());
        assert!(db_to_linear(999.0).is_nan());
        assert!(db_to_linear(1500.0).is_nan());
        assert!(db_to_linear(f64::NAN).is_nan());
        assert_eq!(db_to_linear(-70.0), 10f64.powf(-7.0));
        assert_eq!(db_to_linear(10.0), 10.0);
    }

    #[test]
    fn test_percent_good_bounds_and_monotonicity() {
        assert_eq!(percent_good(1.0, 10.0), 10.0);
        assert_eq!(percent_good(8.0, 10.0), 80.0);
        assert_eq!(percent_good(3.0, 0.0), 0.0);
        assert_eq!(percent_good(3.0, -1.0), 0.0);
        assert_eq!(percent_good(15.0, 10.0), 100.0);
        assert!(percent_good(f64::NAN, 10.0).is_nan());

        let raw = 7.0;
        let mut last = 0.0;
        for retained in 0..=7 {
            let pg = percent_good(retained as f64, raw);
            assert!((0.0..=100.0).contains(&pg));
            assert!(pg >= last);
            last = pg;
        }
    }

    #[test]
    fn test_motion_percent_remap() {
        assert!(motion_percent(0.0).is_nan());
        assert!(motion_percent(f64::NAN).is_nan());
        let m = motion_percent(3.0);
        assert!((m - (100.0 * 10f64.powf(0.3) - 100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_merge_takes_matching_aux_values() {
        let canonical = table(vec![row(10, &[-70.0, -71.0])]);
        let aux = AuxStreams {
            sv_raw: Some(stream(
                StreamKind::SvRaw,
                &[(10, 1, -65.0), (10, 2, -66.0)],
            )),
            ..Default::default()
        };
        let mut warnings = WarningLog::new();

        let batch = merge_channel(
            &canonical,
            &aux,
            &ChannelConfig::new("38kHz", 38.0),
            &lenient_quality(),
            false,
            &mut warnings,
        );

        assert_eq!(batch.cells.len(), 2);
        assert!((batch.cells[0].sv_raw - db_to_linear(-65.0)).abs() < 1e-15);
        assert!((batch.cells[1].sv_raw - db_to_linear(-66.0)).abs() < 1e-15);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_merge_missing_aux_key_warns_and_yields_nan() {
        let canonical = table(vec![row(10, &[-70.0, -71.0])]);
        let aux = AuxStreams {
            sv_raw: Some(stream(StreamKind::SvRaw, &[(10, 1, -65.0)])),
            ..Default::default()
        };
        let mut warnings = WarningLog::new();

        let batch = merge_channel(
            &canonical,
            &aux,
            &ChannelConfig::new("38kHz", 38.0),
            &lenient_quality(),
            false,
            &mut warnings,
        );

        assert_eq!(batch.cells.len(), 2);
        assert!(batch.cells[1].sv_raw.is_nan());
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings.entries()[0].warning,
            ContinuityWarning::MissingAuxCell {
                kind: StreamKind::SvRaw,
                interval: 10,
                layer: 2,
            }
        );
    }

    #[test]
    fn test_merge_absent_stream_is_silent() {
        let canonical = table(vec![row(10, &[-70.0])]);
        let mut warnings = WarningLog::new();

        let batch = merge_channel(
            &canonical,
            &AuxStreams::default(),
            &ChannelConfig::new("38kHz", 38.0),
            &lenient_quality(),
            false,
            &mut warnings,
        );

        assert_eq!(batch.cells.len(), 1);
        assert!(batch.cells[0].sv_raw.is_nan());
        assert!(batch.cells[0].percent_good.is_nan());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_quality_gate_drops_low_percent_good() {
        let canonical = table(vec![row(10, &[-70.0, -71.0])]);
        let aux = AuxStreams {
            raw_count: Some(stream(
                StreamKind::RawCount,
                &[(10, 1, 10.0), (10, 2, 10.0)],
            )),
            kept_count: Some(stream(
                StreamKind::KeptCount,
                &[(10, 1, 1.0), (10, 2, 8.0)],
            )),
            ..Default::default()
        };
        let mut warnings = WarningLog::new();

        let batch = merge_channel(
            &canonical,
            &aux,
            &ChannelConfig::new("38kHz", 38.0),
            &QualityConfig {
                min_percent_good: 50.0,
                min_good_cells: 1,
            },
            false,
            &mut warnings,
        );

        // Layer 1 is 10% good and dropped; layer 2 is 80% good.
        assert_eq!(batch.cells.len(), 1);
        assert_eq!(batch.cells[0].key.layer, 2);
        assert_eq!(batch.cells[0].percent_good, 80.0);
    }

    #[test]
    fn test_depth_cutoff_drops_deep_layers() {
        // Bins of 10 m: layer depths 5, 15, 25, 35.
        let canonical = table(vec![row(10, &[-70.0, -71.0, -72.0, -73.0])]);
        let channel = ChannelConfig {
            name: "38kHz".to_string(),
            frequency_khz: 38.0,
            max_depth_m: 20.0,
        };
        let mut warnings = WarningLog::new();

        let batch = merge_channel(
            &canonical,
            &AuxStreams::default(),
            &channel,
            &lenient_quality(),
            false,
            &mut warnings,
        );

        assert_eq!(batch.cells.len(), 2);
        assert!(batch.cells.iter().all(|c| c.depth <= 20.0));
    }

    #[test]
    fn test_noise_emitted_once_per_interval() {
        let canonical = table(vec![row(10, &[-70.0, -71.0]), row(11, &[-60.0, -61.0])]);
        let noise = stream(StreamKind::BackgroundNoise, &[(10, 1, -125.0)]);
        let aux = AuxStreams {
            noise: Some(noise.samples),
            ..Default::default()
        };
        let mut warnings = WarningLog::new();

        let batch = merge_channel(
            &canonical,
            &aux,
            &ChannelConfig::new("38kHz", 38.0),
            &lenient_quality(),
            false,
            &mut warnings,
        );

        assert_eq!(batch.noise, vec![(10, -125.0)]);
        // Interval 11 had no noise sample.
        assert_eq!(warnings.len(), 1);
        assert_eq!(
            warnings.entries()[0].warning,
            ContinuityWarning::MissingAuxCell {
                kind: StreamKind::BackgroundNoise,
                interval: 11,
                layer: 0,
            }
        );
    }

    #[test]
    fn test_extended_streams_ignored_unless_enabled() {
        let canonical = table(vec![row(10, &[-70.0])]);
        let aux = AuxStreams {
            skewness: Some(stream(StreamKind::Skewness, &[(10, 1, 0.4)])),
            ..Default::default()
        };
        let mut warnings = WarningLog::new();

        let channel = ChannelConfig::new("38kHz", 38.0);
        let off = merge_channel(
            &canonical,
            &aux,
            &channel,
            &lenient_quality(),
            false,
            &mut warnings,
        );
        assert!(off.cells[0].skewness.is_nan());

        let on = merge_channel(
            &canonical,
            &aux,
            &channel,
            &lenient_quality(),
            true,
            &mut warnings,
        );
        assert!((on.cells[0].skewness - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_interval_range() {
        let canonical = table(vec![row(10, &[-70.0]), row(12, &[-71.0])]);
        let mut warnings = WarningLog::new();
        let batch = merge_channel(
            &canonical,
            &AuxStreams::default(),
            &ChannelConfig::new("38kHz", 38.0),
            &lenient_quality(),
            false,
            &mut warnings,
        );
        assert_eq!(batch.interval_range(), Some((10, 12)));
        assert_eq!(batch.max_layer(), 1);
    }
}
