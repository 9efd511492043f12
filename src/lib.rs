//! Echo-integration data fusion and grid assembly.
//!
//! This crate provides tools for:
//! - Parsing and normalizing per-channel acoustic survey export tables
//! - Restoring true survey interval numbers via timestamp alignment
//! - Merging canonical and auxiliary measurement streams by cell key
//! - Folding file batches into a dense time x depth x channel grid
//! - Finalizing the grid with quality flags and global bounds
//!
//! # Example
//!
//! ```no_run
//! use echogrid::{run_survey, FusionConfig};
//! use std::path::Path;
//!
//! let config = FusionConfig::default();
//! let (survey, warnings) = run_survey(Path::new("survey/"), &config).unwrap();
//! println!("{} good cells, {} warnings", survey.good_cell_count(), warnings.len());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{ChannelConfig, ExportConfig, FusionConfig, QualityConfig};
pub use crate::core::errors::FormatError;
pub use crate::core::warnings::{ContinuityWarning, WarningLog};
pub use processors::finalize::SurveyGrid;
pub use processors::grid::{Grid, GridAssembler};
pub use processors::pipeline::run_survey;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
