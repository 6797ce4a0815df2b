//! Core engine: resolve snapshots → price → score → persist.

pub mod resolver;
pub mod run;

pub use run::{RunCounters, RunOrchestrator, RunReport, RunRequest, RunStage};
