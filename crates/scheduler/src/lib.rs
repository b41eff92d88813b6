//! Scheduling layer - cadences, the transition executor and the per-family loops.

#![warn(missing_docs)]

pub mod cadence;
pub mod config;
pub mod executor;
pub mod runner;
pub mod scheduler;

pub use cadence::Cadence;
pub use config::{ConfigError, FamilyConfig, SchedulerConfig, StorageBackend, StorageConfig};
pub use executor::{CycleOutcome, CycleReport, DueSet, TransitionExecutor};
pub use runner::{FamilyRunner, Trigger};
pub use scheduler::{run_family_loop, Scheduler, SchedulerHandle};
