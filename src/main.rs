use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use gwbatch::bridge::Bridge;
use gwbatch::config::Config;
use gwbatch::pipeline::{run_synchronously, Pipeline};
use gwbatch::request::Message;
use gwbatch::slurm::SlurmCluster;
use gwbatch::store::FileJobStore;
use gwbatch::WorkingDirectory;

/// Submit parameter estimation runs to SLURM and track them
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a request and print the new job id
    Submit {
        /// JSON request
        #[arg(long)]
        request: PathBuf,
    },
    /// Print the status of a job as JSON
    Status {
        #[arg(long)]
        job_id: u64,
    },
    /// Cancel every scheduler task of a job
    Cancel {
        #[arg(long)]
        job_id: u64,
    },
    /// Print every tracked job as JSON
    List,
    /// Cancel a job, forget it and remove its working directory
    Clean {
        #[arg(long)]
        job_id: u64,
    },
    /// Take the data generation stage out of an existing submission script
    Patch {
        /// Outer submission shell, rewritten in place
        #[arg(long)]
        script: PathBuf,
        /// Run the detached stage from here once the script is rewritten
        #[arg(long)]
        run_in: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    info!("terve! starting up :)");

    let cli = Cli::parse();
    let config = cli.config;

    match cli.command {
        Command::Submit { request } => {
            let request = Message { path: request }.read()?;
            let job_id = bridge(&config)?.submit(&request).context("Submitting job")?;
            println!("{job_id}");
        }
        Command::Status { job_id } => {
            let report = bridge(&config)?.status(job_id);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Cancel { job_id } => {
            if !bridge(&config)?.cancel(job_id) {
                bail!("Job {job_id} does not exist");
            }
        }
        Command::List => {
            let jobs = bridge(&config)?.list()?;
            let json: Vec<serde_json::Value> = jobs
                .iter()
                .map(|job| {
                    serde_json::json!({
                        "job_id": job.job_id,
                        "submit_id": job.submit_id,
                        "working_directory": job.working_directory,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Command::Clean { job_id } => {
            if !bridge(&config)?.clean(job_id)? {
                bail!("Job {job_id} does not exist");
            }
        }
        Command::Patch { script, run_in } => patch(&script, run_in, &config)?,
    }

    Ok(())
}

fn bridge(config: &Config) -> Result<Bridge<FileJobStore, SlurmCluster>> {
    let store = FileJobStore::open(&config.store_path())
        .with_context(|| format!("Opening job store {}", config.store_path().display()))?;
    info!("Using job store {}", store.path().display());
    let cluster = SlurmCluster::new(config.slurm_commands());
    Ok(Bridge::new(store, cluster, config.bridge_settings()))
}

fn patch(script: &Path, run_in: Option<PathBuf>, config: &Config) -> Result<()> {
    let text = fs::read_to_string(script).with_context(|| format!("Reading {}", script.display()))?;
    let mut pipeline = Pipeline::parse(&text);

    let Some(stage) = pipeline.detach_data_generation() else {
        info!("{} has no data generation stage, leaving it alone", script.display());
        return Ok(());
    };
    pipeline.write(script).with_context(|| format!("Writing {}", script.display()))?;
    println!("{}\t{}", stage.name(), stage.script);

    if let Some(path) = run_in {
        let wd = WorkingDirectory { path };
        run_synchronously(&stage, &wd, &config.shell)?;
    }
    Ok(())
}
