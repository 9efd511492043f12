//! Export discovery and the per-batch fold driver.
//!
//! Filenames follow `<set>_<channel>_<kind>.csv`, where `<channel>` is a
//! configured channel name and `<kind>` is one of the export kinds. Files
//! are grouped by set stem into file batches and folded in sorted set
//! order; within a batch, channels fold in configured order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use regex::Regex;

use crate::config::FusionConfig;
use crate::core::align::{align_table, read_interval_index, IntervalIndex};
use crate::core::errors::{FormatError, Result};
use crate::core::loaders::{
    flatten_table, read_export_table, read_noise_table, SourceStream, StreamKind,
};
use crate::core::warnings::{ContinuityWarning, WarningLog};

use super::finalize::{finalize, SurveyGrid};
use super::grid::GridAssembler;
use super::merge::{merge_channel, AuxStreams};

/// Export files found for one channel of one file set.
#[derive(Debug, Clone, Default)]
pub struct ChannelPaths {
    pub sv: Option<PathBuf>,
    pub intervals: Option<PathBuf>,
    pub sv_raw: Option<PathBuf>,
    pub raw_count: Option<PathBuf>,
    pub kept_count: Option<PathBuf>,
    pub snr: Option<PathBuf>,
    pub noise: Option<PathBuf>,
    pub motion: Option<PathBuf>,
    pub skewness: Option<PathBuf>,
    pub kurtosis: Option<PathBuf>,
    pub std_dev: Option<PathBuf>,
}

impl ChannelPaths {
    fn assign(&mut self, kind: &str, path: PathBuf) {
        let slot = match kind {
            "sv" => &mut self.sv,
            "intervals" => &mut self.intervals,
            "sv_raw" => &mut self.sv_raw,
            "raw_count" => &mut self.raw_count,
            "kept_count" => &mut self.kept_count,
            "snr" => &mut self.snr,
            "noise" => &mut self.noise,
            "motion" => &mut self.motion,
            "skew" => &mut self.skewness,
            "kurt" => &mut self.kurtosis,
            "std" => &mut self.std_dev,
            _ => return,
        };
        *slot = Some(path);
    }
}

/// One file batch: every discovered export of one set stem, indexed
/// parallel to the configured channel list.
#[derive(Debug, Clone)]
pub struct BatchPaths {
    pub set: String,
    pub channels: Vec<ChannelPaths>,
}

/// Scan a survey directory for export files and group them into batches.
///
/// Files whose channel segment matches no configured channel are ignored.
/// Batches are returned in sorted set order, which is the fold order.
///
/// # Errors
///
/// Returns a `FormatError` if the directory cannot be read.
pub fn discover_batches(dir: &Path, config: &FusionConfig) -> Result<Vec<BatchPaths>> {
    let channel_alt = config
        .channels
        .iter()
        .map(|c| regex::escape(&c.name))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = format!(
        r"^(?P<set>.+)_(?P<chan>{})_(?P<kind>sv_raw|raw_count|kept_count|snr|noise|motion|skew|kurt|std|intervals|sv)\.csv$",
        channel_alt
    );
    let re = Regex::new(&pattern).expect("discovery pattern is well-formed");

    let mut sets: BTreeMap<String, Vec<ChannelPaths>> = BTreeMap::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(caps) = re.captures(name) else {
            debug!("ignoring non-export file: {}", name);
            continue;
        };

        let set = caps["set"].to_string();
        let kind = caps["kind"].to_string();
        let Some(chan_idx) = config.channel_index(&caps["chan"]) else {
            continue;
        };

        sets.entry(set)
            .or_insert_with(|| vec![ChannelPaths::default(); config.channels.len()])
            [chan_idx]
            .assign(&kind, path);
    }

    Ok(sets
        .into_iter()
        .map(|(set, channels)| BatchPaths { set, channels })
        .collect())
}

fn read_aux(
    path: Option<&Path>,
    kind: StreamKind,
    index: &IntervalIndex,
    config: &FusionConfig,
    warnings: &mut WarningLog,
) -> Result<Option<SourceStream>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let table = read_export_table(path, &config.export)?;
    if table.rows.is_empty() {
        warnings.push(ContinuityWarning::EmptyAux { kind });
        return Ok(None);
    }
    let table = align_table(table, index, warnings)?;
    Ok(Some(flatten_table(&table, kind)))
}

/// Fold one file batch into the grid, channel by channel.
///
/// # Errors
///
/// Any `FormatError` aborts the batch; the caller must treat the grid's
/// partial state for this batch as discarded.
pub fn fold_batch(
    assembler: &mut GridAssembler,
    batch: &BatchPaths,
    config: &FusionConfig,
    warnings: &mut WarningLog,
) -> Result<()> {
    assembler.begin_batch();

    for (idx, chan_cfg) in config.channels.iter().enumerate() {
        let paths = &batch.channels[idx];
        warnings.set_context(format!("{}/{}", batch.set, chan_cfg.name));

        let Some(sv_path) = &paths.sv else {
            warnings.push(ContinuityWarning::ChannelSkipped {
                channel: chan_cfg.name.clone(),
            });
            continue;
        };
        let intervals_path =
            paths
                .intervals
                .as_ref()
                .ok_or_else(|| FormatError::MissingExport {
                    set: batch.set.clone(),
                    channel: chan_cfg.name.clone(),
                    kind: "intervals",
                })?;

        let canonical = read_export_table(sv_path, &config.export)?;
        if canonical.rows.is_empty() {
            return Err(FormatError::EmptyExport(sv_path.clone()));
        }

        let index = read_interval_index(intervals_path)?;
        let canonical = align_table(canonical, &index, warnings)?;

        let aux = AuxStreams {
            sv_raw: read_aux(
                paths.sv_raw.as_deref(),
                StreamKind::SvRaw,
                &index,
                config,
                warnings,
            )?,
            raw_count: read_aux(
                paths.raw_count.as_deref(),
                StreamKind::RawCount,
                &index,
                config,
                warnings,
            )?,
            kept_count: read_aux(
                paths.kept_count.as_deref(),
                StreamKind::KeptCount,
                &index,
                config,
                warnings,
            )?,
            snr: read_aux(
                paths.snr.as_deref(),
                StreamKind::SignalNoise,
                &index,
                config,
                warnings,
            )?,
            motion: read_aux(
                paths.motion.as_deref(),
                StreamKind::Motion,
                &index,
                config,
                warnings,
            )?,
            skewness: if config.extended {
                read_aux(
                    paths.skewness.as_deref(),
                    StreamKind::Skewness,
                    &index,
                    config,
                    warnings,
                )?
            } else {
                None
            },
            kurtosis: if config.extended {
                read_aux(
                    paths.kurtosis.as_deref(),
                    StreamKind::Kurtosis,
                    &index,
                    config,
                    warnings,
                )?
            } else {
                None
            },
            std_dev: if config.extended {
                read_aux(
                    paths.std_dev.as_deref(),
                    StreamKind::StdDev,
                    &index,
                    config,
                    warnings,
                )?
            } else {
                None
            },
            noise: match &paths.noise {
                Some(p) => Some(read_noise_table(p, config.export.noise_row_stride)?),
                None => None,
            },
        };

        let fused = merge_channel(
            &canonical,
            &aux,
            chan_cfg,
            &config.quality,
            config.extended,
            warnings,
        );
        assembler.fold_channel(idx, &fused, warnings)?;
    }

    assembler.end_batch();
    Ok(())
}

/// Discover, fold, and finalize a whole survey directory.
///
/// # Errors
///
/// The first `FormatError` aborts the run and names the offending file.
pub fn run_survey(dir: &Path, config: &FusionConfig) -> Result<(SurveyGrid, WarningLog)> {
    let batches = discover_batches(dir, config)?;
    let mut warnings = WarningLog::new();
    let mut assembler = GridAssembler::new(config);

    for batch in &batches {
        info!("folding file set '{}'", batch.set);
        fold_batch(&mut assembler, batch, config, &mut warnings)?;
    }

    warnings.set_context("");
    let survey = finalize(assembler.into_grid(), &config.quality);
    Ok((survey, warnings))
}
