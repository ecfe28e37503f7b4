use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::{debug, info, warn};
use thiserror::Error;

use crate::slurm::state::{classify, describe, JobStatus};
use crate::slurm::Cluster;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Can't run {}: {source}", .program.display())]
    Spawn { program: PathBuf, source: io::Error },

    #[error("{} exited with {code:?}: {stderr}", .program.display())]
    Failed { program: PathBuf, code: Option<i32>, stderr: String },
}

/// Locations of the Slurm client binaries
#[derive(Debug, Clone)]
pub struct SlurmCommands {
    pub sbatch: PathBuf,
    pub sacct: PathBuf,
    pub scancel: PathBuf,
}

impl Default for SlurmCommands {
    fn default() -> Self {
        Self {
            sbatch: PathBuf::from("sbatch"),
            sacct: PathBuf::from("sacct"),
            scancel: PathBuf::from("scancel"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlurmCluster {
    commands: SlurmCommands,
}

impl SlurmCluster {
    pub fn new(commands: SlurmCommands) -> Self {
        Self { commands }
    }
}

impl Cluster for SlurmCluster {
    fn submit(&self, script: &Path, working_directory: &Path) -> Option<u64> {
        let mut sbatch = Command::new(&self.commands.sbatch);
        let cmd = sbatch.arg(script).current_dir(working_directory);
        info!("Running sbatch process in {}", working_directory.display());
        info!("{:?}", &cmd);

        let output = match run(cmd, &self.commands.sbatch) {
            Ok(output) => output,
            Err(err) => {
                warn!("Submission of {} failed: {err}", script.display());
                return None;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_submit_output(&stdout) {
            Some(id) => {
                info!("SLURM job id: {id}");
                Some(id)
            }
            None => {
                warn!("Can't parse a job id from sbatch output: {:?}", stdout.trim());
                None
            }
        }
    }

    fn status(&self, task_id: u64) -> Result<Option<(JobStatus, String)>, ClusterError> {
        let mut sacct = Command::new(&self.commands.sacct);
        let task = task_id.to_string();
        let cmd = sacct.args(["-P", "-n", "-j", task.as_str(), "-o", "jobid,state"]);

        let output = run(cmd, &self.commands.sacct)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("sacct output for {task_id}: {stdout:?}");

        let native = match find_accounting_state(&stdout, task_id) {
            Some(native) => native,
            None => {
                debug!("No accounting row for {task_id}");
                return Ok(None);
            }
        };

        match classify(native) {
            Some(status) => Ok(Some((status, describe(status, native)))),
            None => {
                warn!("Unrecognised scheduler state {native:?} for {task_id}");
                Ok(None)
            }
        }
    }

    fn cancel(&self, task_id: u64) {
        let mut scancel = Command::new(&self.commands.scancel);
        let cmd = scancel.arg(task_id.to_string());
        info!("Cancelling SLURM job {task_id}");

        if let Err(err) = run(cmd, &self.commands.scancel) {
            warn!("scancel {task_id} failed: {err}");
        }
    }
}

/// Run a command to completion, treating a non-zero exit as an error
fn run(cmd: &mut Command, program: &Path) -> Result<Output, ClusterError> {
    let output = cmd
        .output()
        .map_err(|source| ClusterError::Spawn { program: program.to_path_buf(), source })?;

    if !output.status.success() {
        return Err(ClusterError::Failed {
            program: program.to_path_buf(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

/// The job id is the last whitespace separated token, e.g. `Submitted batch job 4242`
///
/// A `;cluster` suffix, as printed by `--parsable` on federated clusters, is ignored.
pub fn parse_submit_output(stdout: &str) -> Option<u64> {
    let token = stdout.split_whitespace().last()?;
    token.split(';').next()?.parse().ok()
}

/// Find the state of the row whose id is exactly `task_id` in `jobid|state` output
///
/// Step rows such as `4242.batch` or `4242.extern` are skipped.
pub fn find_accounting_state(stdout: &str, task_id: u64) -> Option<&str> {
    let wanted = task_id.to_string();
    stdout
        .lines()
        .filter_map(|line| line.split_once('|'))
        .find(|(id, _)| id.trim() == wanted)
        .map(|(_, state)| state.split('|').next().unwrap_or(state).trim())
}
