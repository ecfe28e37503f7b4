use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{info, warn};
use thiserror::Error;

use crate::pipeline::Stage;
use crate::WorkingDirectory;

#[derive(Error, Debug)]
pub enum PreStageError {
    #[error("Can't open stage log {}: {source}", .path.display())]
    Log { path: PathBuf, source: io::Error },

    #[error("Can't start stage {stage}: {source}")]
    Spawn { stage: String, source: io::Error },

    #[error("Stage {stage} exited with {code:?}, see {}", .log.display())]
    Failed { stage: String, code: Option<i32>, log: PathBuf },
}

/// Run a detached stage on the submitting host and wait for it
///
/// The stage script runs from the working directory with stdout and stderr going to the log
/// files the stage would have had on the cluster. A non-zero exit is an error, so the caller can
/// stop before anything depending on the stage reaches the scheduler.
pub fn run_synchronously(stage: &Stage, wd: &WorkingDirectory, shell: &Path) -> Result<(), PreStageError> {
    let name = stage.name().to_string();
    let stdout_path = log_path(wd, stage.output(), &name, "out");
    let stderr_path = log_path(wd, stage.error(), &name, "err");

    let stdout = open_log(&stdout_path)?;
    let stderr = if stderr_path == stdout_path {
        stdout.try_clone().map_err(|source| PreStageError::Log { path: stderr_path.clone(), source })?
    } else {
        open_log(&stderr_path)?
    };

    info!("Running stage {name} synchronously in {}", wd.path.display());
    let status = Command::new(shell)
        .arg(&stage.script)
        .current_dir(&wd.path)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .status()
        .map_err(|source| PreStageError::Spawn { stage: name.clone(), source })?;

    if !status.success() {
        warn!("Stage {name} failed with {status}");
        return Err(PreStageError::Failed { stage: name, code: status.code(), log: stderr_path });
    }

    info!("Stage {name} completed");
    Ok(())
}

/// Scheduler log paths are relative to the working directory; stages without one get `<name>.<ext>`
fn log_path(wd: &WorkingDirectory, assigned: Option<&str>, name: &str, extension: &str) -> PathBuf {
    match assigned {
        Some(path) => wd.path.join(path),
        None => wd.path.join(format!("{name}.{extension}")),
    }
}

fn open_log(path: &Path) -> Result<File, PreStageError> {
    let log_error = |source| PreStageError::Log { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(log_error)?;
    }
    File::create(path).map_err(log_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SbatchArg;

    fn stage_with_script(wd: &WorkingDirectory, body: &str) -> Stage {
        fs::create_dir_all(wd.path.join("submit")).unwrap();
        fs::write(wd.path.join("submit/run_data0.sh"), body).unwrap();
        Stage::new(
            "jid0",
            vec![
                SbatchArg::Plain("--job-name=run_data0".to_string()),
                SbatchArg::Plain("--output=log_data_generation/run_data0.out".to_string()),
                SbatchArg::Plain("--error=log_data_generation/run_data0.err".to_string()),
            ],
            "submit/run_data0.sh",
        )
    }

    #[test]
    fn test_success_writes_assigned_logs() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory { path: dir.path().to_path_buf() };
        let stage = stage_with_script(&wd, "echo fetched\necho warning >&2\npwd > where.txt\n");

        run_synchronously(&stage, &wd, Path::new("sh")).unwrap();

        let out = fs::read_to_string(wd.path.join("log_data_generation/run_data0.out")).unwrap();
        let err = fs::read_to_string(wd.path.join("log_data_generation/run_data0.err")).unwrap();
        assert_eq!(out, "fetched\n");
        assert_eq!(err, "warning\n");
        assert!(wd.path.join("where.txt").is_file());
    }

    #[test]
    fn test_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory { path: dir.path().to_path_buf() };
        let stage = stage_with_script(&wd, "echo no network >&2\nexit 3\n");

        let result = run_synchronously(&stage, &wd, Path::new("sh"));

        assert!(matches!(result, Err(PreStageError::Failed { code: Some(3), .. })));
    }

    #[test]
    fn test_missing_shell_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let wd = WorkingDirectory { path: dir.path().to_path_buf() };
        let stage = stage_with_script(&wd, "true\n");

        let result = run_synchronously(&stage, &wd, Path::new("/nonexistent/shell"));

        assert!(matches!(result, Err(PreStageError::Spawn { .. })));
    }
}
