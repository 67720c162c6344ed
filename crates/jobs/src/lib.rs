// crates/jobs/src/lib.rs
//! Background job tracker for long-running async tasks.
//!
//! Provides:
//! - `JobRegistry` — in-memory store of job records with guarded transitions
//! - `Executor` — runs a task and drives its record to a terminal state
//! - `ProgressReporter` — lets a running task report its own progress
//! - `spawn_sweeper` — periodic eviction of old finished jobs
//!
//! Callers create a job, launch it without awaiting, then poll
//! `JobRegistry::get` (or `subscribe`) until it reaches a terminal state.

pub mod executor;
pub mod registry;
pub mod sweeper;
pub mod types;

pub use executor::{Executor, ProgressReporter};
pub use registry::JobRegistry;
pub use sweeper::{spawn_sweeper, SweeperConfig};
pub use types::{
    JobError, JobErrorKind, JobEvent, JobEventKind, JobFilter, JobId, JobRecord, JobStatus,
    Metadata, ParseJobIdError,
};
