//! Thin synchronous wrapper around the scheduler's submit, accounting and cancel commands

use std::path::Path;

pub use crate::slurm::cluster::{ClusterError, SlurmCluster, SlurmCommands};
pub use crate::slurm::state::JobStatus;

/// Run sbatch, sacct and scancel and parse what they print
pub mod cluster;
/// Normalized job states and the sacct state table
pub mod state;

/// Scheduler operations the bridge depends on
///
/// Every call blocks until the scheduler command returns. No timeout is applied.
pub trait Cluster {
    /// Submit `script` from `working_directory`, returning the scheduler id
    ///
    /// Failures are logged and reported as `None`.
    fn submit(&self, script: &Path, working_directory: &Path) -> Option<u64>;

    /// Look up a task in accounting
    ///
    /// `Ok(None)` means the scheduler answered but has no matching row (or an unknown state);
    /// `Err` means the query itself failed.
    fn status(&self, task_id: u64) -> Result<Option<(JobStatus, String)>, ClusterError>;

    /// Ask the scheduler to cancel a task. Fire-and-forget.
    fn cancel(&self, task_id: u64);
}
