use std::fmt;
use std::path::PathBuf;

use clap::{Args, ValueEnum};

use crate::bridge::BridgeSettings;
use crate::pipeline::GeneratorSettings;
use crate::slurm::cluster::SlurmCommands;
use crate::WorkingDirectory;

/// Deployment namespace, keeps job stores and working directories of deployments apart
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum PlatformNamespace {
    Dev,
    Test,
    Prod,
}

impl PlatformNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformNamespace::Dev => "dev",
            PlatformNamespace::Test => "test",
            PlatformNamespace::Prod => "prod",
        }
    }
}

impl fmt::Display for PlatformNamespace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Global options shared by every subcommand
///
/// Every option can also be set through an environment variable, which is how the bridge is
/// normally configured when it runs behind a request handler.
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Directory holding the job store and its lock file
    #[arg(long, env = "GWBATCH_STATE_DIR", default_value = "/var/lib/gwbatch")]
    pub state_dir: PathBuf,

    /// Root of the per-job working directories
    #[arg(long, env = "GWBATCH_WORK_DIR", default_value = "/scratch/gwbatch")]
    pub work_dir: PathBuf,

    /// Deployment namespace
    #[arg(long, env = "GWBATCH_NAMESPACE", value_enum, default_value_t = PlatformNamespace::Dev)]
    pub namespace: PlatformNamespace,

    /// sbatch binary
    #[arg(long, env = "GWBATCH_SBATCH", default_value = "sbatch")]
    pub sbatch: PathBuf,

    /// sacct binary
    #[arg(long, env = "GWBATCH_SACCT", default_value = "sacct")]
    pub sacct: PathBuf,

    /// scancel binary
    #[arg(long, env = "GWBATCH_SCANCEL", default_value = "scancel")]
    pub scancel: PathBuf,

    /// Shell used to run stages synchronously on the submitting host
    #[arg(long, env = "GWBATCH_SHELL", default_value = "/bin/bash")]
    pub shell: PathBuf,

    /// Directory of the priors that can be selected by name
    #[arg(long, env = "GWBATCH_PRIOR_DIR", default_value = "/opt/gwbatch/priors")]
    pub prior_dir: PathBuf,

    /// Wall time of the outer submission shell (HH:MM:SS)
    #[arg(long, env = "GWBATCH_JOB_TIME", default_value = "00:10:00")]
    pub job_time: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/gwbatch"),
            work_dir: PathBuf::from("/scratch/gwbatch"),
            namespace: PlatformNamespace::Dev,
            sbatch: PathBuf::from("sbatch"),
            sacct: PathBuf::from("sacct"),
            scancel: PathBuf::from("scancel"),
            shell: PathBuf::from("/bin/bash"),
            prior_dir: PathBuf::from("/opt/gwbatch/priors"),
            job_time: "00:10:00".to_string(),
        }
    }
}

impl Config {
    /// Job store file, `<state_dir>/<namespace>/job_store.json`
    pub fn store_path(&self) -> PathBuf {
        self.state_dir.join(self.namespace.as_str()).join("job_store.json")
    }

    /// Parent of every job's working directory
    pub fn job_root(&self) -> WorkingDirectory {
        WorkingDirectory { path: self.work_dir.join(self.namespace.as_str()) }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            job_root: self.job_root(),
            generator: GeneratorSettings { prior_dir: self.prior_dir.clone(), job_time: self.job_time.clone() },
            shell: self.shell.clone(),
        }
    }

    pub fn slurm_commands(&self) -> SlurmCommands {
        SlurmCommands {
            sbatch: self.sbatch.clone(),
            sacct: self.sacct.clone(),
            scancel: self.scancel.clone(),
        }
    }
}
