//! Bridge between gravitational-wave parameter estimation requests and a Slurm cluster
//!
//! A request is translated into a run configuration, expanded into a multi-stage submission
//! script and handed to `sbatch`. Job records live in a file-backed store guarded by an advisory
//! lock, and status polling walks the outer submission shell and then every downstream task
//! listed in the task ledger.

use std::path::PathBuf;

/// Command line and environment configuration
pub mod config;
/// Durable job records guarded by a cross-process lock
pub mod store;
/// Wrappers around sbatch, sacct and scancel
pub mod slurm;
/// Read submission requests and translate them into run configuration
pub mod request;
/// Stage model of a submission script, its serializer and the synchronous pre-stage
pub mod pipeline;
/// Submission flow and job lifecycle state machine
pub mod bridge;
/// Best-effort removal of job working directories
pub mod cleanup;

/// Directory a job's files are rendered into and the scheduler is run from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirectory {
    pub path: PathBuf,
}
