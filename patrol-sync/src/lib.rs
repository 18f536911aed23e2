//! # patrol-sync
//!
//! The sync engine: candidate discovery and filtering, the external
//! review generator boundary, the cycle orchestrator, and the retention
//! and garbage collector.
//!
//! Call [`Orchestrator::run_cycle`] for one full
//! discovery → delta → processing → persistence pass, or
//! [`gc::run_gc`] for one collector pass.

pub mod discover;
pub mod error;
pub mod gc;
pub mod generator;
pub mod orchestrator;

pub use error::SyncError;
pub use gc::{run_gc, GcReport};
pub use generator::{CommandGenerator, Generator, GeneratorOutcome, SettingsGenerator};
pub use orchestrator::{
    CycleOptions, CycleOutcome, CycleReport, ItemReport, Orchestrator, PendingItem,
};
