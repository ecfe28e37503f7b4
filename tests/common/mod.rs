//! Shared fixtures for the bridge integration tests
//!
//! A scripted in-memory scheduler plus helpers to lay out job stores and working directories in
//! temporary directories.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use gwbatch::bridge::{Bridge, BridgeSettings};
use gwbatch::pipeline::GeneratorSettings;
use gwbatch::slurm::state::describe;
use gwbatch::slurm::{Cluster, ClusterError, JobStatus};
use gwbatch::store::{FileJobStore, JobRecord, JobStore, TASK_LEDGER};
use gwbatch::WorkingDirectory;
use tempfile::TempDir;

/// Scheduler double answering from a table of task states
#[derive(Default)]
pub struct FakeCluster {
    pub states: RefCell<HashMap<u64, JobStatus>>,
    pub unreachable: RefCell<HashSet<u64>>,
    pub next_submit: RefCell<Option<u64>>,
    pub submitted: RefCell<Vec<(PathBuf, PathBuf)>>,
    pub cancelled: RefCell<Vec<u64>>,
    pub polled: RefCell<Vec<u64>>,
}

impl FakeCluster {
    pub fn accepting(submit_id: u64) -> Self {
        let cluster = Self::default();
        cluster.next_submit.replace(Some(submit_id));
        cluster
    }

    pub fn set(&self, task_id: u64, status: JobStatus) {
        self.states.borrow_mut().insert(task_id, status);
    }
}

impl Cluster for FakeCluster {
    fn submit(&self, script: &Path, working_directory: &Path) -> Option<u64> {
        self.submitted.borrow_mut().push((script.to_path_buf(), working_directory.to_path_buf()));
        *self.next_submit.borrow()
    }

    fn status(&self, task_id: u64) -> Result<Option<(JobStatus, String)>, ClusterError> {
        self.polled.borrow_mut().push(task_id);
        if self.unreachable.borrow().contains(&task_id) {
            return Err(ClusterError::Failed {
                program: PathBuf::from("sacct"),
                code: Some(1),
                stderr: "slurmdbd: connection refused".to_string(),
            });
        }
        Ok(self
            .states
            .borrow()
            .get(&task_id)
            .map(|status| (*status, describe(*status, status.as_str()))))
    }

    fn cancel(&self, task_id: u64) {
        self.cancelled.borrow_mut().push(task_id);
    }
}

/// Temporary layout of a deployment: state directory, job root and prior directory
pub struct Deployment {
    pub dir: TempDir,
}

impl Deployment {
    pub fn new() -> Self {
        Self { dir: tempfile::tempdir().unwrap() }
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.path().join("state").join("job_store.json")
    }

    pub fn job_root(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn settings(&self, shell: &str) -> BridgeSettings {
        BridgeSettings {
            job_root: WorkingDirectory { path: self.job_root() },
            generator: GeneratorSettings {
                prior_dir: self.dir.path().join("priors"),
                job_time: "00:10:00".to_string(),
            },
            shell: PathBuf::from(shell),
        }
    }

    pub fn bridge(&self, cluster: FakeCluster) -> Bridge<FileJobStore, FakeCluster> {
        self.bridge_with_shell(cluster, "true")
    }

    pub fn bridge_with_shell(&self, cluster: FakeCluster, shell: &str) -> Bridge<FileJobStore, FakeCluster> {
        let store = FileJobStore::open(&self.store_path()).unwrap();
        Bridge::new(store, cluster, self.settings(shell))
    }
}

/// Store a job record, creating its working directory and, if given, its task ledger
pub fn track_job<S: JobStore>(
    store: &S,
    root: &Path,
    job_id: u64,
    submit_id: Option<u64>,
    ledger: Option<&[(&str, u64)]>,
) -> JobRecord {
    let working_directory = root.join(job_id.to_string());
    let submit_directory = PathBuf::from("submit");
    fs::create_dir_all(working_directory.join(&submit_directory)).unwrap();

    let job = JobRecord { job_id, submit_id, working_directory, submit_directory };
    if let Some(tasks) = ledger {
        let lines: String = tasks.iter().map(|(label, id)| format!("{label} {id}\n")).collect();
        fs::write(job.working_directory.join("submit").join(TASK_LEDGER), lines).unwrap();
    }
    store.put(&job).unwrap();
    job
}
