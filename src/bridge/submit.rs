use log::{info, warn};
use thiserror::Error;

use crate::bridge::Bridge;
use crate::pipeline::{generate, run_synchronously, GenerateError, PreStageError};
use crate::request::{translate, SimulationRequest};
use crate::slurm::Cluster;
use crate::store::{JobRecord, JobStore, StoreError};
use crate::WorkingDirectory;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error("Stage run before submission failed: {0}")]
    PreStage(#[from] PreStageError),

    #[error("Scheduler didn't accept job {0}")]
    Rejected(u64),
}

impl<S: JobStore, C: Cluster> Bridge<S, C> {
    /// Turn a request into a running job and return its job id
    ///
    /// Runs that need open data get their data generation stage run here, synchronously, before
    /// the outer submission shell reaches the scheduler; if it fails nothing is submitted. A job
    /// record is only stored once the scheduler has accepted the outer shell.
    pub fn submit(&self, request: &SimulationRequest) -> Result<u64, SubmitError> {
        let config = translate(request);
        let job_id = self.store.next_id()?;
        let wd = WorkingDirectory { path: self.settings.job_root.path.join(job_id.to_string()) };
        info!("Submitting job {job_id} ({})", config.label);

        let mut run = generate(&config, &wd, &self.settings.generator)?;

        let detached = if config.requires_open_data() {
            let stage = run.pipeline.detach_data_generation();
            if stage.is_none() {
                warn!("Job {job_id} needs open data but has no data generation stage");
            }
            stage
        } else {
            info!("Job {job_id} uses simulated data, every stage runs on the cluster");
            None
        };

        run.write_script()?;

        if let Some(stage) = detached {
            run_synchronously(&stage, &wd, &self.settings.shell)?;
        }

        let submit_id = self
            .cluster
            .submit(&run.script, &wd.path)
            .ok_or(SubmitError::Rejected(job_id))?;

        let record = JobRecord {
            job_id,
            submit_id: Some(submit_id),
            working_directory: wd.path.clone(),
            submit_directory: run.submit_directory.clone(),
        };
        self.store.put(&record)?;
        info!("Job {job_id} submitted as SLURM job {submit_id}");

        Ok(job_id)
    }
}
