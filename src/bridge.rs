//! Submission flow and job lifecycle tracking
//!
//! The bridge owns nothing global: the job store and the cluster adapter are injected, so several
//! bridges (or several processes) can share one store file and one scheduler.

use std::path::PathBuf;

use log::{info, warn};

use crate::cleanup;
use crate::pipeline::GeneratorSettings;
use crate::slurm::Cluster;
use crate::store::{JobRecord, JobStore, StoreError};
use crate::WorkingDirectory;

pub use crate::bridge::status::{StatusReport, TaskStatusEntry, MISSING_JOB};
pub use crate::bridge::submit::SubmitError;

/// Job lifecycle state machine and task ledger polling
pub mod status;
/// Request to running job
pub mod submit;

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Parent of every job's working directory
    pub job_root: WorkingDirectory,
    pub generator: GeneratorSettings,
    /// Shell running detached stages on the submitting host
    pub shell: PathBuf,
}

pub struct Bridge<S: JobStore, C: Cluster> {
    store: S,
    cluster: C,
    settings: BridgeSettings,
}

impl<S: JobStore, C: Cluster> Bridge<S, C> {
    pub fn new(store: S, cluster: C, settings: BridgeSettings) -> Self {
        Self { store, cluster, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.store.list()
    }

    /// Cancel the outer submission shell and every task in the ledger
    ///
    /// Cancellation is fire-and-forget; a later status poll sees the cancelled tasks and prunes
    /// the job. Returns whether the job exists.
    pub fn cancel(&self, job_id: u64) -> bool {
        let job = match self.store.get(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(err) => {
                warn!("Can't load job {job_id} to cancel it: {err}");
                return false;
            }
        };

        if let Some(submit_id) = job.submit_id {
            self.cluster.cancel(submit_id);
        }
        for task in status::read_ledger(&job).unwrap_or_default() {
            self.cluster.cancel(task.task_id);
        }
        true
    }

    /// Cancel a job, forget it and reclaim its working directory
    pub fn clean(&self, job_id: u64) -> Result<bool, StoreError> {
        let Some(job) = self.store.get(job_id)? else {
            return Ok(false);
        };

        self.cancel(job_id);
        self.store.delete(&job)?;
        info!("Forgot job {job_id}");
        cleanup::delete(&job);
        Ok(true)
    }
}
