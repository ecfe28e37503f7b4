use std::fs;
use std::io;

use log::{debug, info, warn};
use serde::Serialize;

use crate::bridge::Bridge;
use crate::slurm::state::describe;
use crate::slurm::{Cluster, JobStatus};
use crate::store::{JobRecord, JobStore};

pub const MISSING_JOB: &str = "Job does not exist. Perhaps it failed to start?";

/// Status of one task, produced per poll and never stored
///
/// `status` is `None` when the scheduler couldn't say: no accounting row yet, an unknown native
/// state, or a failed query (explained in `info`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatusEntry {
    pub what: String,
    pub status: Option<JobStatus>,
    pub info: String,
}

impl TaskStatusEntry {
    fn new(what: &str, status: Option<JobStatus>, info: impl Into<String>) -> Self {
        Self { what: what.to_string(), status, info: info.into() }
    }

    fn is_terminal_failure(&self) -> bool {
        self.status.is_some_and(|status| status.is_terminal_failure())
    }
}

/// Answer to a status query
///
/// `complete` is true when the report covers the whole job: either every task in the ledger was
/// polled, or the job doesn't exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: Vec<TaskStatusEntry>,
    pub complete: bool,
}

impl StatusReport {
    pub fn missing() -> Self {
        Self {
            status: vec![TaskStatusEntry::new("system", Some(JobStatus::Error), MISSING_JOB)],
            complete: true,
        }
    }
}

/// One `<label> <task id>` line of the task ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub label: String,
    pub task_id: u64,
}

const SUBMIT: &str = "submit";

impl<S: JobStore, C: Cluster> Bridge<S, C> {
    /// Poll a job
    ///
    /// Never fails: a missing job, a broken store or an unreachable scheduler all come back as
    /// status entries. Every ledger task is polled even after one of them is found to have
    /// failed, so the caller gets the full picture of the final round; the job record is then
    /// pruned once, and later queries get the missing job report.
    pub fn status(&self, job_id: u64) -> StatusReport {
        let job = match self.store.get(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => return StatusReport::missing(),
            Err(err) => {
                warn!("Can't load job {job_id}: {err}");
                return StatusReport {
                    status: vec![TaskStatusEntry::new("system", Some(JobStatus::Error), format!("Job store unavailable: {err}"))],
                    complete: false,
                };
            }
        };

        let submit = self.get_submit_status(&job);
        let mut pruned = submit.is_terminal_failure();
        let mut entries = vec![submit];

        let ledger = match read_ledger(&job) {
            Ok(ledger) => ledger,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("Can't read task ledger of job {job_id}: {err}");
                }
                debug!("Job {job_id} hasn't handed any tasks to the scheduler yet");
                return StatusReport { status: entries, complete: false };
            }
        };

        let mut failed = false;
        for task in ledger {
            let entry = self.poll_task(&task.label, task.task_id);
            failed |= entry.is_terminal_failure();
            entries.push(entry);
        }

        if failed && !pruned {
            self.prune(&job);
            pruned = true;
        }
        debug!("Polled job {job_id}, pruned: {pruned}");

        StatusReport { status: entries, complete: true }
    }

    /// Status of the outer submission shell
    ///
    /// Unfinished states are reported as they are. A terminal failure prunes the job. Completion
    /// drops the submit id from the record, moving the job on to its task ledger.
    pub fn get_submit_status(&self, job: &JobRecord) -> TaskStatusEntry {
        let Some(submit_id) = job.submit_id else {
            return TaskStatusEntry::new(SUBMIT, Some(JobStatus::Completed), describe(JobStatus::Completed, ""));
        };

        let entry = self.poll_task(SUBMIT, submit_id);
        match entry.status {
            Some(status) if status.is_terminal_failure() => {
                info!("Submission of job {} ended with {status}", job.job_id);
                self.prune(job);
            }
            Some(JobStatus::Completed) => {
                let mut updated = job.clone();
                updated.submit_id = None;
                match self.store.update(&updated) {
                    Ok(true) => info!("Submission of job {} completed", job.job_id),
                    Ok(false) => debug!("Job {} was removed while its submission was polled", job.job_id),
                    Err(err) => warn!("Can't record completed submission of job {}: {err}", job.job_id),
                }
            }
            _ => {}
        }
        entry
    }

    fn poll_task(&self, what: &str, task_id: u64) -> TaskStatusEntry {
        match self.cluster.status(task_id) {
            Ok(Some((status, info))) => TaskStatusEntry::new(what, Some(status), info),
            Ok(None) => TaskStatusEntry::new(what, None, format!("Task {task_id} isn't known to the scheduler yet")),
            Err(err) => {
                warn!("Can't poll task {task_id}: {err}");
                TaskStatusEntry::new(what, None, format!("Can't query the scheduler: {err}"))
            }
        }
    }

    fn prune(&self, job: &JobRecord) {
        match self.store.delete(job) {
            Ok(()) => info!("Pruned failed job {}", job.job_id),
            Err(err) => warn!("Can't prune failed job {}: {err}", job.job_id),
        }
    }
}

/// Read the task ledger of a job, skipping malformed lines
pub fn read_ledger(job: &JobRecord) -> io::Result<Vec<LedgerEntry>> {
    let content = fs::read_to_string(job.ledger_path())?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let entry = parse_ledger_line(line);
            if entry.is_none() {
                warn!("Skipping malformed ledger line {line:?} of job {}", job.job_id);
            }
            entry
        })
        .collect())
}

fn parse_ledger_line(line: &str) -> Option<LedgerEntry> {
    let mut tokens = line.split_whitespace();
    let label = tokens.next()?;
    let task_id = tokens.last()?.parse().ok()?;
    Some(LedgerEntry { label: label.to_string(), task_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ledger_line() {
        assert_eq!(
            parse_ledger_line("GW150914_data0 4242"),
            Some(LedgerEntry { label: "GW150914_data0".to_string(), task_id: 4242 })
        );
        assert_eq!(parse_ledger_line("GW150914_data0"), None);
        assert_eq!(parse_ledger_line("GW150914_data0 abc"), None);
    }

    #[test]
    fn test_missing_report_serialises() {
        let json = serde_json::to_value(StatusReport::missing()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": [{"what": "system", "status": "ERROR", "info": "Job does not exist. Perhaps it failed to start?"}],
                "complete": true
            })
        );
    }
}
