//! Fusion stages: merge, grid assembly, finalization, batch driving.

pub mod finalize;
pub mod grid;
pub mod merge;
pub mod pipeline;
