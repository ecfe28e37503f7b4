use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;
use tinytemplate::TinyTemplate;

use crate::pipeline::{Pipeline, SbatchArg, Stage};
use crate::request::{Detector, PriorChoice, RunConfig};
use crate::store::TASK_LEDGER;
use crate::WorkingDirectory;

/// Side files (stage scripts, task ledger, outer shell logs) live here, relative to the run
pub const SUBMIT_DIRECTORY: &str = "submit";

const LOG_DIRECTORIES: [&str; 3] = ["log_data_generation", "log_data_analysis", "log_results"];

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Can't write {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("Can't render template: {0}")]
    Template(#[from] tinytemplate::error::Error),
}

/// Installation specific settings for generated runs
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    /// Directory holding the named priors, `<name>.prior`
    pub prior_dir: PathBuf,
    /// Wall time of the outer submission shell
    pub job_time: String,
}

/// A run rendered to disk, with its outer submission shell still in memory
///
/// The outer shell isn't written until [`GeneratedRun::write_script`] so the caller can detach
/// stages from the pipeline first.
#[derive(Debug)]
pub struct GeneratedRun {
    pub working_directory: WorkingDirectory,
    /// Relative to the working directory
    pub submit_directory: PathBuf,
    /// Outer submission shell
    pub script: PathBuf,
    pub pipeline: Pipeline,
}

impl GeneratedRun {
    pub fn write_script(&self) -> Result<(), GenerateError> {
        info!("Writing outer submission shell {}", self.script.display());
        self.pipeline.write(&self.script).map_err(io_error(&self.script))?;
        make_executable(&self.script)
    }
}

/// How a stage is submitted and what it runs
struct StageSpec {
    name: String,
    command: String,
    log_directory: &'static str,
    memory: &'static str,
    time: &'static str,
    /// Index of the stage this one waits for
    after: Option<usize>,
}

/// Rendering context for the outer shell header
#[derive(Serialize)]
struct HeaderContext {
    name: String,
    job_time: String,
    submit_dir: String,
    time_now: String,
}

/// Rendering context for a stage script
#[derive(Serialize)]
struct StageContext {
    name: String,
    env_vars: String,
    working_directory: String,
    command: String,
    time_now: String,
}

/// Rendering context for the run configuration
#[derive(Serialize)]
struct ConfigContext {
    label: String,
    outdir: String,
    detectors: String,
    duration: String,
    sampling_frequency: String,
    trigger_time: String,
    channel_dict: String,
    minimum_frequency: String,
    maximum_frequency: String,
    gaussian_noise: String,
    n_simulation: String,
    prior_file: String,
    sampler: String,
    sampler_kwargs: String,
    waveform_approximant: String,
    source_model: String,
    time_now: String,
}

/// Render the run configuration, stage scripts and outer submission shell of a run
pub fn generate(config: &RunConfig, wd: &WorkingDirectory, settings: &GeneratorSettings) -> Result<GeneratedRun, GenerateError> {
    info!("Creating run {} in working directory {}", config.label, wd.path.display());

    if wd.path.exists() {
        warn!("Job directory already exists, files will be overwritten");
        fs::remove_dir_all(&wd.path).map_err(io_error(&wd.path))?;
    }
    for dir in [SUBMIT_DIRECTORY].iter().chain(LOG_DIRECTORIES.iter()) {
        let path = wd.path.join(dir);
        fs::create_dir_all(&path).map_err(io_error(&path))?;
    }

    let prior_file = resolve_prior(config, wd, settings)?;
    let ini = write_config(config, wd, &prior_file)?;

    let mut pipeline = Pipeline::new();
    pipeline.push_verbatim(&render_header(config, settings)?);

    let ledger = format!("{SUBMIT_DIRECTORY}/{TASK_LEDGER}");
    let specs = stage_specs(config, &ini);
    for (idx, spec) in specs.iter().enumerate() {
        let script = write_stage_script(spec, wd)?;
        pipeline.push_blank();
        pipeline.push_stage(stage(idx, spec, &script), &ledger);
    }

    let script = wd.path.join(SUBMIT_DIRECTORY).join(format!("slurm_{}_master.sh", config.label));

    Ok(GeneratedRun {
        working_directory: wd.clone(),
        submit_directory: PathBuf::from(SUBMIT_DIRECTORY),
        script,
        pipeline,
    })
}

/// Data generation, analysis and result post-processing, each waiting for the previous one
fn stage_specs(config: &RunConfig, ini: &str) -> Vec<StageSpec> {
    let generation = format!("{}_data0", config.label);
    let trigger = config.trigger_time.to_string().replace('.', "-");
    let analysis = format!("{generation}_{trigger}_analysis_{}_{}", config.interferometers(), config.sampler.name());
    let data_dump = format!("data/{generation}_{trigger}_generation_data_dump.pickle");
    let detectors: Vec<String> = config.detectors.iter().map(|d| format!("--detectors {}", d.name)).collect();

    vec![
        StageSpec {
            command: format!("bilby_pipe_generation {ini} --label {generation} --idx 0 --trigger-time {}", config.trigger_time),
            name: generation,
            log_directory: "log_data_generation",
            memory: "8G",
            time: "01:00:00",
            after: None,
        },
        StageSpec {
            command: format!(
                "bilby_pipe_analysis {ini} --outdir . {} --label {analysis} --data-dump-file {data_dump} --sampler {}",
                detectors.join(" "),
                config.sampler.name()
            ),
            name: analysis.clone(),
            log_directory: "log_data_analysis",
            memory: "4G",
            time: "7-00:00:00",
            after: Some(0),
        },
        StageSpec {
            command: format!("bilby_result -r result/{analysis}_result.json --label {analysis}_final_result --outdir final_result"),
            name: format!("{analysis}_final_result"),
            log_directory: "log_results",
            memory: "2G",
            time: "01:00:00",
            after: Some(1),
        },
    ]
}

fn stage(idx: usize, spec: &StageSpec, script: &str) -> Stage {
    let mut args = vec![
        SbatchArg::Plain("--nodes=1".to_string()),
        SbatchArg::Plain("--ntasks-per-node=1".to_string()),
        SbatchArg::Plain(format!("--mem={}", spec.memory)),
        SbatchArg::Plain(format!("--time={}", spec.time)),
        SbatchArg::Plain(format!("--job-name={}", spec.name)),
    ];
    if let Some(after) = spec.after {
        args.push(SbatchArg::AfterOk(vec![format!("jid{after}")]));
    }
    args.push(SbatchArg::Plain(format!("--output={}/{}.out", spec.log_directory, spec.name)));
    args.push(SbatchArg::Plain(format!("--error={}/{}.err", spec.log_directory, spec.name)));

    Stage::new(&format!("jid{idx}"), args, script)
}

/// Render the outer shell header using TinyTemplate
fn render_header(config: &RunConfig, settings: &GeneratorSettings) -> Result<String, GenerateError> {
    /// included header template
    static HEADER: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/header.txt"));
    let context = HeaderContext {
        name: config.label.clone(),
        job_time: settings.job_time.clone(),
        submit_dir: SUBMIT_DIRECTORY.to_string(),
        time_now: Utc::now().to_string(),
    };
    render("header", HEADER, &context)
}

/// Write a stage script to the submit directory, returning its path relative to the run
fn write_stage_script(spec: &StageSpec, wd: &WorkingDirectory) -> Result<String, GenerateError> {
    /// included stage template
    static STAGE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/stage.txt"));
    /// included environment variables, everything is static
    static ENV_VARS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/env_vars.txt"));

    let context = StageContext {
        name: spec.name.clone(),
        env_vars: ENV_VARS.to_string(),
        working_directory: wd.path.display().to_string(),
        command: spec.command.clone(),
        time_now: Utc::now().to_string(),
    };
    let content = render("stage", STAGE, &context)?;

    let relative = format!("{SUBMIT_DIRECTORY}/{}.sh", spec.name);
    let out_path = wd.path.join(&relative);
    info!("Writing stage script to {}", out_path.display());
    fs::write(&out_path, content).map_err(io_error(&out_path))?;
    make_executable(&out_path)?;

    Ok(relative)
}

/// Write the run configuration to `<label>_config_complete.ini`, returning its path
fn write_config(config: &RunConfig, wd: &WorkingDirectory, prior_file: &Path) -> Result<String, GenerateError> {
    /// included run configuration template
    static CONFIG: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/config.ini"));

    let simulated = !config.requires_open_data();

    let context = ConfigContext {
        label: config.label.clone(),
        outdir: wd.path.display().to_string(),
        detectors: config.detectors.iter().map(|d| d.name).collect::<Vec<_>>().join(", "),
        duration: config.duration.to_string(),
        sampling_frequency: config.sampling_frequency.to_string(),
        trigger_time: config.trigger_time.to_string(),
        channel_dict: detector_dict(&config.detectors, |d| d.channel.clone()),
        minimum_frequency: detector_dict(&config.detectors, |d| d.minimum_frequency.to_string()),
        maximum_frequency: detector_dict(&config.detectors, |d| d.maximum_frequency.to_string()),
        gaussian_noise: if simulated { "True" } else { "False" }.to_string(),
        n_simulation: if simulated { "1" } else { "0" }.to_string(),
        prior_file: prior_file.display().to_string(),
        sampler: config.sampler.name().to_string(),
        sampler_kwargs: config.sampler.kwargs().to_string(),
        waveform_approximant: config.waveform.approximant().to_string(),
        source_model: config.waveform.source_model().to_string(),
        time_now: Utc::now().to_string(),
    };
    let content = render("config", CONFIG, &context)?;

    let out_path = wd.path.join(format!("{}_config_complete.ini", config.label));
    info!("Writing run configuration to {}", out_path.display());
    fs::write(&out_path, content).map_err(io_error(&out_path))?;

    Ok(out_path.display().to_string())
}

/// `{H1:value, L1:value}`
fn detector_dict(detectors: &[Detector], value: impl Fn(&Detector) -> String) -> String {
    let entries: Vec<String> = detectors.iter().map(|d| format!("{}:{}", d.name, value(d))).collect();
    format!("{{{}}}", entries.join(", "))
}

/// Named priors come from the installation, prior files are copied into the run
///
/// A prior file that can't be read falls back to the default named prior.
fn resolve_prior(config: &RunConfig, wd: &WorkingDirectory, settings: &GeneratorSettings) -> Result<PathBuf, GenerateError> {
    let named = |name: &str| settings.prior_dir.join(format!("{name}.prior"));
    match &config.prior {
        PriorChoice::Named(name) => Ok(named(name)),
        PriorChoice::Path(path) => {
            let out_path = wd.path.join(format!("{}.prior", config.label));
            match fs::copy(path, &out_path) {
                Ok(_) => Ok(out_path),
                Err(err) => {
                    warn!("Can't copy prior file {}: {err}, using the default prior", path.display());
                    Ok(named("4s"))
                }
            }
        }
    }
}

fn render<C: Serialize>(name: &str, template: &str, context: &C) -> Result<String, GenerateError> {
    let mut tt = TinyTemplate::new();
    // shell scripts, not HTML
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template(name, template)?;
    Ok(tt.render(name, context)?)
}

fn make_executable(path: &Path) -> Result<(), GenerateError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).map_err(io_error(path))?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).map_err(io_error(path))?;
    }
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> GenerateError {
    let path = path.to_path_buf();
    move |source| GenerateError::Io { path, source }
}
