use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Name of the task ledger written by the outer submission shell
pub const TASK_LEDGER: &str = "slurm_ids";

/// Everything the bridge remembers about a submitted job
///
/// `submit_id` is the scheduler id of the outer submission shell. It is dropped once the shell is
/// seen to complete, after which the task ledger is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: u64,
    #[serde(default)]
    pub submit_id: Option<u64>,
    pub working_directory: PathBuf,
    /// Relative to `working_directory`
    pub submit_directory: PathBuf,
}

impl JobRecord {
    pub fn ledger_path(&self) -> PathBuf {
        self.working_directory
            .join(&self.submit_directory)
            .join(TASK_LEDGER)
    }
}
