//! Non-fatal continuity warnings and the run-level warning log.

use log::warn;
use thiserror::Error;

use super::loaders::StreamKind;

/// Conditions worth reporting that do not abort a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContinuityWarning {
    /// Unsampled interval range between two sequential batches.
    #[error("interval gap: no data for intervals {first_missing}..={last_missing}")]
    IntervalGap { first_missing: u32, last_missing: u32 },

    /// An auxiliary stream has no sample for a canonical cell key.
    #[error("{kind} stream has no sample for interval {interval} layer {layer}")]
    MissingAuxCell {
        kind: StreamKind,
        interval: u32,
        layer: u32,
    },

    /// Timestamp intersection discarded rows on one or both sides.
    #[error("alignment dropped {table_rows} table row(s) and {index_rows} index row(s)")]
    AlignmentDrop { table_rows: usize, index_rows: usize },

    /// An auxiliary export parsed to zero rows; its fields stay missing.
    #[error("{kind} export is empty; fields will be missing")]
    EmptyAux { kind: StreamKind },

    /// A later channel extended an axis beyond the batch baseline.
    #[error("channel coverage grew the {axis} axis from {from} to {to} slots")]
    CoverageGrowth {
        axis: GrowthAxis,
        from: usize,
        to: usize,
    },

    /// An interval cannot be placed on the monotonic time axis.
    #[error("interval {interval} precedes the time axis and cannot be placed")]
    UnmappedInterval { interval: u32 },

    /// A configured channel has no canonical export in this set.
    #[error("channel '{channel}' has no export in this set; skipped")]
    ChannelSkipped { channel: String },
}

/// Axis named by a coverage-growth warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthAxis {
    Time,
    Depth,
}

impl std::fmt::Display for GrowthAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrowthAxis::Time => write!(f, "time"),
            GrowthAxis::Depth => write!(f, "depth"),
        }
    }
}

/// One logged warning plus the file/channel context it was raised under.
#[derive(Debug, Clone)]
pub struct WarningEntry {
    pub context: String,
    pub warning: ContinuityWarning,
}

/// Append-only collection of every warning raised during a run.
///
/// Entries are mirrored to the `log` facade as they arrive, so a caller
/// gets live diagnostics without polling the log.
#[derive(Debug, Default)]
pub struct WarningLog {
    context: String,
    entries: Vec<WarningEntry>,
}

impl WarningLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the file/channel context applied to subsequent entries.
    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }

    /// Record a warning under the current context.
    pub fn push(&mut self, warning: ContinuityWarning) {
        if self.context.is_empty() {
            warn!("{}", warning);
        } else {
            warn!("[{}] {}", self.context, warning);
        }
        self.entries.push(WarningEntry {
            context: self.context.clone(),
            warning,
        });
    }

    /// All entries recorded so far.
    pub fn entries(&self) -> &[WarningEntry] {
        &self.entries
    }

    /// Number of entries recorded so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no warnings were recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate the warnings without their contexts.
    pub fn warnings(&self) -> impl Iterator<Item = &ContinuityWarning> {
        self.entries.iter().map(|e| &e.warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_records_context() {
        let mut log = WarningLog::new();
        log.set_context("set1/38kHz");
        log.push(ContinuityWarning::IntervalGap {
            first_missing: 51,
            last_missing: 59,
        });

        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].context, "set1/38kHz");
    }

    #[test]
    fn test_warning_display() {
        let w = ContinuityWarning::MissingAuxCell {
            kind: StreamKind::RawCount,
            interval: 12,
            layer: 3,
        };
        let text = w.to_string();
        assert!(text.contains("interval 12"));
        assert!(text.contains("layer 3"));
    }
}
