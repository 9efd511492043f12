//! Grid finalization: depth compaction, global bounds, quality flags.

use chrono::NaiveDateTime;
use rayon::prelude::*;

use crate::config::QualityConfig;

use super::grid::{ChannelDesc, ExtendedFields, FieldSet, Grid, TimeSlot};

/// Cell carries no quality judgement.
pub const FLAG_UNSET: u8 = 0;

/// Cell value is physically plausible and sufficiently sampled.
pub const FLAG_GOOD: u8 = 1;

/// Linear-domain bounds of physically plausible processed values
/// (-120 dB .. 0 dB).
const SV_VALID_MIN: f64 = 1e-12;
const SV_VALID_MAX: f64 = 1.0;

/// Longitude spread beyond which the data is taken to cross the
/// antimeridian.
const ANTIMERIDIAN_SPREAD_DEG: f64 = 350.0;

/// Global extent of the finalized grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridBounds {
    pub time_start: Option<NaiveDateTime>,
    pub time_end: Option<NaiveDateTime>,
    pub latitude_min: f64,
    pub latitude_max: f64,
    /// Western bound; taken from the positive subset when the track
    /// crosses the date line.
    pub longitude_min: f64,
    /// Eastern bound; taken from the negative subset when the track
    /// crosses the date line.
    pub longitude_max: f64,
    pub depth_min: f64,
    pub depth_max: f64,
}

/// The immutable output artifact handed to the downstream writer.
#[derive(Debug)]
pub struct SurveyGrid {
    pub channels: Vec<ChannelDesc>,
    pub time: Vec<TimeSlot>,
    pub depth: Vec<f64>,
    pub fields: FieldSet,
    pub extended: Option<ExtendedFields>,
    /// Background noise, \[channel\]\[time\].
    pub noise: Vec<Vec<f64>>,
    /// Quality flags, \[channel\]\[time\]\[depth\].
    pub flags: Vec<Vec<Vec<u8>>>,
    pub bounds: GridBounds,
}

impl SurveyGrid {
    /// Total number of cells flagged good.
    pub fn good_cell_count(&self) -> usize {
        self.flags
            .iter()
            .flatten()
            .flatten()
            .filter(|&&f| f == FLAG_GOOD)
            .count()
    }
}

fn minmax(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut lo = f64::NAN;
    let mut hi = f64::NAN;
    for v in values.filter(|v| v.is_finite()) {
        if lo.is_nan() || v < lo {
            lo = v;
        }
        if hi.is_nan() || v > hi {
            hi = v;
        }
    }
    (lo, hi)
}

/// Longitude range with antimeridian handling: when valid longitudes
/// spread wider than 350 degrees the track is treated as crossing the
/// date line and the bounds come from the positive and negative subsets
/// separately.
fn longitude_bounds(lons: &[f64]) -> (f64, f64) {
    let (lo, hi) = minmax(lons.iter().copied());
    if lo.is_nan() || hi - lo <= ANTIMERIDIAN_SPREAD_DEG {
        return (lo, hi);
    }
    let (west, _) = minmax(lons.iter().copied().filter(|&v| v >= 0.0));
    let (_, east) = minmax(lons.iter().copied().filter(|&v| v < 0.0));
    (west, east)
}

fn compute_bounds(grid: &Grid) -> GridBounds {
    let (lat_min, lat_max) = minmax(grid.time.iter().map(|s| s.latitude));
    let lons: Vec<f64> = grid.time.iter().map(|s| s.longitude).collect();
    let (lon_min, lon_max) = longitude_bounds(&lons);
    let (depth_min, depth_max) = minmax(grid.depth.iter().copied());

    GridBounds {
        time_start: grid.time.iter().find_map(|s| s.timestamp),
        time_end: grid.time.iter().rev().find_map(|s| s.timestamp),
        latitude_min: lat_min,
        latitude_max: lat_max,
        longitude_min: lon_min,
        longitude_max: lon_max,
        depth_min,
        depth_max,
    }
}

/// Finalize an assembled grid into the output artifact.
///
/// Depth slots that never received a valid depth value are dropped from
/// every field. Each cell is flagged good when its processed value lies
/// in the valid physical range and its percent-good exceeds the
/// acceptance threshold; a (channel, time) column with fewer good cells
/// than `quality.min_good_cells` is demoted back to unflagged.
pub fn finalize(mut grid: Grid, quality: &QualityConfig) -> SurveyGrid {
    // Compact unused depth slots.
    let keep: Vec<usize> = grid
        .depth
        .iter()
        .enumerate()
        .filter(|(_, d)| d.is_finite())
        .map(|(i, _)| i)
        .collect();
    if keep.len() < grid.depth.len() {
        grid.depth = keep.iter().map(|&i| grid.depth[i]).collect();
        grid.each_field_mut(|f| f.compact_depth(&keep));
    }

    let bounds = compute_bounds(&grid);

    let time_len = grid.time.len();
    let depth_len = grid.depth.len();
    let min_pg = quality.min_percent_good;
    let min_good = quality.min_good_cells;

    let flags: Vec<Vec<Vec<u8>>> = (0..grid.channels.len())
        .into_par_iter()
        .map(|c| {
            let mut channel_flags = vec![vec![FLAG_UNSET; depth_len]; time_len];
            for (t, row) in channel_flags.iter_mut().enumerate() {
                let mut good = 0usize;
                for (d, flag) in row.iter_mut().enumerate() {
                    let sv = grid.fields.sv_mean.get(c, t, d);
                    let pg = grid.fields.percent_good.get(c, t, d);
                    if sv >= SV_VALID_MIN && sv <= SV_VALID_MAX && pg > min_pg {
                        *flag = FLAG_GOOD;
                        good += 1;
                    }
                }
                if good > 0 && good < min_good {
                    row.fill(FLAG_UNSET);
                }
            }
            channel_flags
        })
        .collect();

    SurveyGrid {
        channels: grid.channels,
        time: grid.time,
        depth: grid.depth,
        fields: grid.fields,
        extended: grid.extended,
        noise: grid.noise,
        flags,
        bounds,
    }
}
