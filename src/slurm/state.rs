use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized job status
///
/// Variants are ordered by lifecycle progress, so `status <= JobStatus::Running` means the job
/// hasn't finished yet. Discriminants are stable and may be shown to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending = 10,
    Submitting = 20,
    Submitted = 30,
    Queued = 40,
    Running = 50,
    Cancelling = 60,
    Cancelled = 70,
    Error = 400,
    WallTimeExceeded = 401,
    OutOfMemory = 402,
    Completed = 500,
}

impl JobStatus {
    /// Error, cancelled, out of memory or wall time exceeded. Jobs in these states are pruned.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::Error | JobStatus::Cancelled | JobStatus::OutOfMemory | JobStatus::WallTimeExceeded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Submitting => "SUBMITTING",
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Cancelling => "CANCELLING",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Error => "ERROR",
            JobStatus::WallTimeExceeded => "WALL_TIME_EXCEEDED",
            JobStatus::OutOfMemory => "OUT_OF_MEMORY",
            JobStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native sacct states grouped by the status they normalize to, highest priority first
const STATE_TABLE: &[(&[&str], JobStatus)] = &[
    (&["BOOT_FAIL", "DEADLINE", "FAILED", "NODE_FAIL", "PREEMPTED", "REVOKED"], JobStatus::Error),
    (&["CANCELLED"], JobStatus::Cancelled),
    (&["OUT_OF_MEMORY"], JobStatus::OutOfMemory),
    (&["TIMEOUT"], JobStatus::WallTimeExceeded),
    (&["COMPLETED"], JobStatus::Completed),
    (&["PENDING", "REQUEUED", "RESIZING"], JobStatus::Queued),
    (&["RUNNING", "SUSPENDED", "COMPLETING"], JobStatus::Running),
];

/// Classify a native sacct state such as `CANCELLED by 1000` or `TIMEOUT`
///
/// Returns `None` for states the table doesn't know about.
pub fn classify(native: &str) -> Option<JobStatus> {
    let upper = native.to_ascii_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .collect();

    STATE_TABLE
        .iter()
        .find(|(family, _)| family.iter().any(|state| words.contains(state)))
        .map(|(_, status)| *status)
}

/// Human readable explanation of a classified state
pub fn describe(status: JobStatus, native: &str) -> String {
    match status {
        JobStatus::Queued => "Job is queued".to_string(),
        JobStatus::Running => "Job is running".to_string(),
        JobStatus::Completed => "Job has completed".to_string(),
        JobStatus::Cancelled => "Job was cancelled".to_string(),
        JobStatus::OutOfMemory => "Job ran out of memory".to_string(),
        JobStatus::WallTimeExceeded => "Job exceeded its wall time".to_string(),
        JobStatus::Error => format!("Job failed with scheduler state {}", native.trim()),
        other => format!("Job is {}", other.as_str().to_lowercase()),
    }
}
