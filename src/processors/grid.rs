//! Incremental time x depth x channel grid assembly.
//!
//! The grid is the single mutable resource of a run. File batches fold
//! into it one at a time, in file-set order; within a batch, channels
//! fold in configured order because the first channel establishes the
//! time baseline later channels extend. Growth only appends at the tail
//! and depth values are frozen once assigned, so single-writer access is
//! sufficient.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::config::FusionConfig;
use crate::core::errors::{FormatError, Result};
use crate::core::warnings::{ContinuityWarning, GrowthAxis, WarningLog};

use super::merge::{FusedBatch, FusedCell};

/// One channel of the output grid.
#[derive(Debug, Clone)]
pub struct ChannelDesc {
    pub name: String,
    pub frequency_khz: f64,
}

/// One retained interval on the time axis.
#[derive(Debug, Clone, Copy)]
pub struct TimeSlot {
    pub interval: u32,
    /// Fixed by the first record observed for the interval.
    pub timestamp: Option<NaiveDateTime>,
    pub latitude: f64,
    pub longitude: f64,
}

impl TimeSlot {
    fn new(interval: u32) -> Self {
        Self {
            interval,
            timestamp: None,
            latitude: f64::NAN,
            longitude: f64::NAN,
        }
    }

    /// True once the slot carries a usable position fix.
    pub fn has_position(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// Dense per-cell field indexed \[channel\]\[time\]\[depth\].
#[derive(Debug, Clone)]
pub struct CellField(Vec<Vec<Vec<f64>>>);

impl CellField {
    fn new(channels: usize) -> Self {
        Self(vec![Vec::new(); channels])
    }

    fn push_time_slot(&mut self, depth: usize) {
        for chan in &mut self.0 {
            chan.push(vec![f64::NAN; depth]);
        }
    }

    fn grow_depth(&mut self, depth: usize) {
        for chan in &mut self.0 {
            for row in chan.iter_mut() {
                row.resize(depth, f64::NAN);
            }
        }
    }

    fn truncate_time(&mut self, len: usize) {
        for chan in &mut self.0 {
            chan.truncate(len);
        }
    }

    fn reserve_time(&mut self, additional: usize) {
        for chan in &mut self.0 {
            chan.reserve(additional);
        }
    }

    pub(crate) fn compact_depth(&mut self, keep: &[usize]) {
        for chan in &mut self.0 {
            for row in chan.iter_mut() {
                *row = keep.iter().map(|&d| row[d]).collect();
            }
        }
    }

    fn set(&mut self, channel: usize, time: usize, depth: usize, value: f64) {
        self.0[channel][time][depth] = value;
    }

    /// Value at \[channel\]\[time\]\[depth\].
    pub fn get(&self, channel: usize, time: usize, depth: usize) -> f64 {
        self.0[channel][time][depth]
    }

    /// One channel's \[time\]\[depth\] matrix.
    pub fn channel(&self, channel: usize) -> &[Vec<f64>] {
        &self.0[channel]
    }
}

/// The per-cell fields every run carries.
#[derive(Debug, Clone)]
pub struct FieldSet {
    /// Processed mean value, linear domain.
    pub sv_mean: CellField,
    /// Unfiltered mean value, linear domain.
    pub sv_raw: CellField,
    pub percent_good: CellField,
    pub snr: CellField,
    pub motion: CellField,
    /// Vertical bin extent in meters.
    pub height: CellField,
}

impl FieldSet {
    fn new(channels: usize) -> Self {
        Self {
            sv_mean: CellField::new(channels),
            sv_raw: CellField::new(channels),
            percent_good: CellField::new(channels),
            snr: CellField::new(channels),
            motion: CellField::new(channels),
            height: CellField::new(channels),
        }
    }

    fn each_mut(&mut self, f: &mut impl FnMut(&mut CellField)) {
        f(&mut self.sv_mean);
        f(&mut self.sv_raw);
        f(&mut self.percent_good);
        f(&mut self.snr);
        f(&mut self.motion);
        f(&mut self.height);
    }
}

/// Higher-order statistic fields, present only in extended runs.
#[derive(Debug, Clone)]
pub struct ExtendedFields {
    pub skewness: CellField,
    pub kurtosis: CellField,
    pub std_dev: CellField,
}

impl ExtendedFields {
    fn new(channels: usize) -> Self {
        Self {
            skewness: CellField::new(channels),
            kurtosis: CellField::new(channels),
            std_dev: CellField::new(channels),
        }
    }

    fn each_mut(&mut self, f: &mut impl FnMut(&mut CellField)) {
        f(&mut self.skewness);
        f(&mut self.kurtosis);
        f(&mut self.std_dev);
    }
}

/// The assembled time x depth x channel grid.
#[derive(Debug, Clone)]
pub struct Grid {
    pub channels: Vec<ChannelDesc>,
    /// Monotonic in interval; one slot per retained interval.
    pub time: Vec<TimeSlot>,
    /// Nominal mid-bin depth per layer; NaN until first assigned.
    pub depth: Vec<f64>,
    pub fields: FieldSet,
    pub extended: Option<ExtendedFields>,
    /// Background noise, \[channel\]\[time\].
    pub noise: Vec<Vec<f64>>,
}

impl Grid {
    fn new(config: &FusionConfig) -> Self {
        let channels: Vec<ChannelDesc> = config
            .channels
            .iter()
            .map(|c| ChannelDesc {
                name: c.name.clone(),
                frequency_khz: c.frequency_khz,
            })
            .collect();
        let n = channels.len();
        Self {
            channels,
            time: Vec::new(),
            depth: Vec::new(),
            fields: FieldSet::new(n),
            extended: config.extended.then(|| ExtendedFields::new(n)),
            noise: vec![Vec::new(); n],
        }
    }

    /// Number of time slots.
    pub fn time_len(&self) -> usize {
        self.time.len()
    }

    /// Number of depth slots.
    pub fn depth_len(&self) -> usize {
        self.depth.len()
    }

    /// Number of channels.
    pub fn channel_len(&self) -> usize {
        self.channels.len()
    }

    pub(crate) fn each_field_mut(&mut self, mut f: impl FnMut(&mut CellField)) {
        self.fields.each_mut(&mut f);
        if let Some(ext) = &mut self.extended {
            ext.each_mut(&mut f);
        }
    }

    fn push_time_slot(&mut self, interval: u32) -> usize {
        let depth = self.depth.len();
        self.time.push(TimeSlot::new(interval));
        self.each_field_mut(|f| f.push_time_slot(depth));
        for chan in &mut self.noise {
            chan.push(f64::NAN);
        }
        self.time.len() - 1
    }

    fn grow_depth(&mut self, depth: usize) {
        self.depth.resize(depth, f64::NAN);
        self.each_field_mut(|f| f.grow_depth(depth));
    }

    fn truncate_time(&mut self, len: usize) {
        self.time.truncate(len);
        self.each_field_mut(|f| f.truncate_time(len));
        for chan in &mut self.noise {
            chan.truncate(len);
        }
    }

    fn reserve_time(&mut self, additional: usize) {
        self.time.reserve(additional);
        self.each_field_mut(|f| f.reserve_time(additional));
        for chan in &mut self.noise {
            chan.reserve(additional);
        }
    }

    fn write_cell(&mut self, channel: usize, time: usize, cell: &FusedCell) {
        let d = (cell.key.layer - 1) as usize;
        self.fields.sv_mean.set(channel, time, d, cell.sv_mean);
        self.fields.sv_raw.set(channel, time, d, cell.sv_raw);
        self.fields
            .percent_good
            .set(channel, time, d, cell.percent_good);
        self.fields.snr.set(channel, time, d, cell.snr);
        self.fields.motion.set(channel, time, d, cell.motion);
        self.fields.height.set(channel, time, d, cell.height);
        if let Some(ext) = &mut self.extended {
            ext.skewness.set(channel, time, d, cell.skewness);
            ext.kurtosis.set(channel, time, d, cell.kurtosis);
            ext.std_dev.set(channel, time, d, cell.std_dev);
        }
    }
}

/// Owns the grid for the duration of a run and folds batches into it.
#[derive(Debug)]
pub struct GridAssembler {
    grid: Grid,
    slot_of: HashMap<u32, usize>,
    last_interval: Option<u32>,
    channels_folded: usize,
    batch_time_len: usize,
    first_batch: bool,
}

impl GridAssembler {
    /// Create an assembler with an empty grid shaped by the configuration.
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            grid: Grid::new(config),
            slot_of: HashMap::new(),
            last_interval: None,
            channels_folded: 0,
            batch_time_len: 0,
            first_batch: true,
        }
    }

    /// The grid assembled so far.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Interval of the last retained time slot.
    pub fn last_interval(&self) -> Option<u32> {
        self.last_interval
    }

    /// Surrender the grid for finalization.
    pub fn into_grid(self) -> Grid {
        self.grid
    }

    /// Start a new file batch.
    pub fn begin_batch(&mut self) {
        self.channels_folded = 0;
        self.batch_time_len = self.grid.time.len();
    }

    /// Fold one channel's merged records into the grid.
    ///
    /// The first channel of a batch performs the overlap/gap checks
    /// against the previous batch and may trim the grid's tail; later
    /// channels may only append.
    ///
    /// # Errors
    ///
    /// Returns `FormatError::OutOfOrderBatch` when the batch ends before
    /// an interval already folded into the grid.
    pub fn fold_channel(
        &mut self,
        channel: usize,
        batch: &FusedBatch,
        warnings: &mut WarningLog,
    ) -> Result<()> {
        let Some((batch_min, batch_max)) = batch.interval_range() else {
            self.channels_folded += 1;
            return Ok(());
        };

        if self.channels_folded == 0 {
            if let Some(last) = self.last_interval {
                if batch_max < last {
                    return Err(FormatError::OutOfOrderBatch {
                        previous_last: last,
                        batch_max,
                    });
                }
                if batch_min <= last {
                    self.trim_overlap(batch_min);
                } else if batch_min > last + 1 {
                    warnings.push(ContinuityWarning::IntervalGap {
                        first_missing: last + 1,
                        last_missing: batch_min - 1,
                    });
                }
            }
            if self.first_batch {
                // Channel 1 of the first batch is the best size estimate
                // we get before folding everything.
                self.grid.reserve_time(batch.intervals.len() * 2);
                self.first_batch = false;
            }
        }

        let need_depth = batch.max_layer() as usize;
        if need_depth > self.grid.depth.len() {
            if self.channels_folded > 0 {
                warnings.push(ContinuityWarning::CoverageGrowth {
                    axis: GrowthAxis::Depth,
                    from: self.grid.depth.len(),
                    to: need_depth,
                });
            }
            self.grid.grow_depth(need_depth);
        }

        for meta in &batch.intervals {
            let slot_idx = match self.slot_of.get(&meta.interval) {
                Some(&t) => t,
                None => {
                    let appendable = self
                        .grid
                        .time
                        .last()
                        .map_or(true, |s| s.interval < meta.interval);
                    if !appendable {
                        warnings.push(ContinuityWarning::UnmappedInterval {
                            interval: meta.interval,
                        });
                        continue;
                    }
                    let t = self.grid.push_time_slot(meta.interval);
                    self.slot_of.insert(meta.interval, t);
                    t
                }
            };

            let slot = &mut self.grid.time[slot_idx];
            if slot.timestamp.is_none() {
                slot.timestamp = Some(meta.timestamp);
                slot.latitude = meta.latitude;
                slot.longitude = meta.longitude;
            }
        }

        if self.channels_folded > 0 && self.grid.time.len() > self.batch_time_len {
            warnings.push(ContinuityWarning::CoverageGrowth {
                axis: GrowthAxis::Time,
                from: self.batch_time_len,
                to: self.grid.time.len(),
            });
        }

        for &(interval, value) in &batch.noise {
            if let Some(&t) = self.slot_of.get(&interval) {
                self.grid.noise[channel][t] = value;
            }
        }

        for cell in &batch.cells {
            let Some(&t) = self.slot_of.get(&cell.key.interval) else {
                continue;
            };
            let d = (cell.key.layer - 1) as usize;
            if self.grid.depth[d].is_nan() {
                self.grid.depth[d] = cell.depth;
            }
            self.grid.write_cell(channel, t, cell);
        }

        if self.channels_folded == 0 {
            self.batch_time_len = self.grid.time.len();
        }
        self.channels_folded += 1;
        Ok(())
    }

    /// Close the current batch: trim trailing slots that never received
    /// a valid position and update the carry state for the next batch.
    pub fn end_batch(&mut self) {
        while let Some(slot) = self.grid.time.last() {
            if slot.has_position() {
                break;
            }
            self.slot_of.remove(&slot.interval);
            let len = self.grid.time.len() - 1;
            self.grid.truncate_time(len);
        }
        if let Some(slot) = self.grid.time.last() {
            self.last_interval = Some(slot.interval);
        }
        self.channels_folded = 0;
        self.batch_time_len = self.grid.time.len();
    }

    /// Drop time slots that the incoming batch will re-cover, keeping at
    /// most the shared boundary slot at the batch's first interval.
    fn trim_overlap(&mut self, first: u32) {
        let cut = self.grid.time.partition_point(|s| s.interval <= first);
        if cut < self.grid.time.len() {
            for slot in &self.grid.time[cut..] {
                self.slot_of.remove(&slot.interval);
            }
            self.grid.truncate_time(cut);
        }
    }
}
