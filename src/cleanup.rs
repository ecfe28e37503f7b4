use std::fs;
use std::io;

use log::{info, warn};

use crate::store::JobRecord;

/// Remove a job's working directory, best effort
///
/// A directory that is already gone is fine and any other failure is only logged. Returns
/// whether the directory was removed by this call.
pub fn delete(job: &JobRecord) -> bool {
    let path = &job.working_directory;
    match fs::remove_dir_all(path) {
        Ok(()) => {
            info!("Removed working directory {} of job {}", path.display(), job.job_id);
            true
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            warn!("Can't remove working directory {}: {err}", path.display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn job(working_directory: PathBuf) -> JobRecord {
        JobRecord { job_id: 1, submit_id: None, working_directory, submit_directory: PathBuf::from("submit") }
    }

    #[test]
    fn test_removes_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let wd = dir.path().join("1");
        fs::create_dir_all(wd.join("submit")).unwrap();
        fs::write(wd.join("submit/slurm_ids"), "a 1\n").unwrap();

        assert!(delete(&job(wd.clone())));
        assert!(!wd.exists());
    }

    #[test]
    fn test_missing_directory_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!delete(&job(dir.path().join("never-created"))));
    }
}
