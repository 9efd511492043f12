//! Command-line interface for the fusion pipeline.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Instant;

use crate::config::FusionConfig;
use crate::core::loaders;
use crate::processors::finalize::finalize;
use crate::processors::grid::GridAssembler;
use crate::processors::pipeline;

#[derive(Parser)]
#[command(name = "echogrid")]
#[command(about = "Echo-integration survey fusion pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fold a survey directory of export tables into a fused grid
    Fuse {
        /// Directory containing the per-channel export CSVs
        survey_dir: PathBuf,
        /// List every continuity warning after the summary
        #[arg(long)]
        show_warnings: bool,
    },

    /// Parse a single export table and report reader statistics
    Inspect {
        /// Export CSV file
        export_file: PathBuf,
    },

    /// Write a default YAML configuration file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.len() > 39 {
            format!("{}...", &value[..36])
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match FusionConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}, using defaults",
                    path.display(),
                    e
                );
                FusionConfig::default()
            }
        },
        None => FusionConfig::default(),
    };

    match cli.command {
        Commands::Fuse {
            survey_dir,
            show_warnings,
        } => {
            cmd_fuse(&survey_dir, show_warnings, &config);
        }
        Commands::Inspect { export_file } => {
            cmd_inspect(&export_file, &config);
        }
        Commands::InitConfig { path } => {
            cmd_init_config(&path, &config);
        }
    }
}

fn cmd_fuse(survey_dir: &PathBuf, show_warnings: bool, config: &FusionConfig) {
    let start = Instant::now();

    println!("Fusing survey exports...");
    println!("Survey directory: {}", survey_dir.display());
    println!(
        "Channels: {}",
        config
            .channels
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let batches = match pipeline::discover_batches(survey_dir, config) {
        Ok(b) => b,
        Err(e) => {
            error!("Discovery failed: {}", e);
            std::process::exit(1);
        }
    };

    if batches.is_empty() {
        error!("No export files found in {}", survey_dir.display());
        std::process::exit(1);
    }

    let pb = ProgressBar::new(batches.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.green} {pos}/{len} {msg}")
            .unwrap(),
    );

    let mut assembler = GridAssembler::new(config);
    let mut warnings = crate::core::warnings::WarningLog::new();

    for batch in &batches {
        pb.set_message(batch.set.clone());
        if let Err(e) = pipeline::fold_batch(&mut assembler, batch, config, &mut warnings) {
            pb.finish_and_clear();
            error!("Fusion failed in set '{}': {}", batch.set, e);
            std::process::exit(1);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let survey = finalize(assembler.into_grid(), &config.quality);

    let time_range = match (survey.bounds.time_start, survey.bounds.time_end) {
        (Some(a), Some(b)) => format!("{} .. {}", a, b),
        _ => "none".to_string(),
    };

    print_summary(
        "Fusion Complete",
        &[
            ("Survey directory", survey_dir.display().to_string()),
            ("File batches", batches.len().to_string()),
            ("Channels", survey.channels.len().to_string()),
            ("Time slots", survey.time.len().to_string()),
            ("Depth bins", survey.depth.len().to_string()),
            ("Good cells", survey.good_cell_count().to_string()),
            ("Warnings", warnings.len().to_string()),
            ("Time range", time_range),
            (
                "Longitude range",
                format!(
                    "{:.3} .. {:.3}",
                    survey.bounds.longitude_min, survey.bounds.longitude_max
                ),
            ),
            (
                "Latitude range",
                format!(
                    "{:.3} .. {:.3}",
                    survey.bounds.latitude_min, survey.bounds.latitude_max
                ),
            ),
            (
                "Depth range",
                format!(
                    "{:.1} .. {:.1} m",
                    survey.bounds.depth_min, survey.bounds.depth_max
                ),
            ),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );

    if show_warnings && !warnings.is_empty() {
        println!("Continuity warnings:");
        for entry in warnings.entries() {
            if entry.context.is_empty() {
                println!("  {}", entry.warning);
            } else {
                println!("  [{}] {}", entry.context, entry.warning);
            }
        }
    }
}

fn cmd_inspect(export_file: &PathBuf, config: &FusionConfig) {
    let start = Instant::now();

    let spinner = create_spinner("Parsing export table...");

    match loaders::read_export_table(export_file, &config.export) {
        Ok(table) => {
            spinner.finish_and_clear();

            print_summary(
                "Export Inspection",
                &[
                    ("File", export_file.display().to_string()),
                    ("Rows", table.rows.len().to_string()),
                    ("Duplicates removed", table.duplicates_removed.to_string()),
                    ("Sentinels mapped", table.sentinels_mapped.to_string()),
                    ("Max layers", table.max_layers().to_string()),
                    ("Payload cells", table.cell_count().to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Inspection failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_init_config(path: &PathBuf, config: &FusionConfig) {
    match config.to_yaml(path) {
        Ok(()) => {
            println!("Wrote configuration to {}", path.display());
        }
        Err(e) => {
            error!("Failed to write config: {}", e);
            std::process::exit(1);
        }
    }
}
