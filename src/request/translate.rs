use std::path::PathBuf;

use log::{debug, info, warn};
use serde_json::Value;

use crate::request::params::{DataSource, DetectorRequest, SimulationRequest};

const DEFAULT_MINIMUM_FREQUENCY: f64 = 20.0;
const DEFAULT_MAXIMUM_FREQUENCY: f64 = 1024.0;
const DEFAULT_CHANNEL: &str = "GWOSC";
const DEFAULT_DURATION: f64 = 4.0;
const DEFAULT_SAMPLING_FREQUENCY: f64 = 16384.0;
const DEFAULT_TRIGGER_TIME: f64 = 0.0;
const DEFAULT_PRIOR: &str = "4s";
const DEFAULT_LABEL: &str = "gwbatch";

/// Priors shipped with the pipeline installation, selected by name
const NAMED_PRIORS: &[&str] = &["4s", "8s", "16s", "32s", "64s", "128s"];

/// Everything the generator needs to render a run, with every value defaulted and checked
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub label: String,
    pub detectors: Vec<Detector>,
    pub duration: f64,
    pub sampling_frequency: f64,
    pub trigger_time: f64,
    pub data: DataSource,
    pub sampler: Sampler,
    pub waveform: Waveform,
    pub prior: PriorChoice,
}

impl RunConfig {
    /// Real data has to be fetched from the open data servers, which compute nodes can't reach
    pub fn requires_open_data(&self) -> bool {
        self.data == DataSource::Real
    }

    /// Detector names concatenated, e.g. `H1L1`
    pub fn interferometers(&self) -> String {
        self.detectors.iter().map(|detector| detector.name).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detector {
    pub name: &'static str,
    pub minimum_frequency: f64,
    pub maximum_frequency: f64,
    pub channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampler {
    Dynesty,
    Nestle,
    Emcee,
}

impl Sampler {
    /// Absent samplers get the default quietly, unknown ones with a warning
    fn parse(name: Option<&str>) -> Sampler {
        let Some(name) = name else {
            debug!("No sampler given, using dynesty");
            return Sampler::Dynesty;
        };
        Sampler::from_name(name).unwrap_or_else(|| {
            warn!("Unknown sampler {name:?}, falling back to dynesty");
            Sampler::Dynesty
        })
    }

    fn from_name(name: &str) -> Option<Sampler> {
        match name.trim().to_ascii_lowercase().as_str() {
            "dynesty" => Some(Sampler::Dynesty),
            "nestle" => Some(Sampler::Nestle),
            "emcee" => Some(Sampler::Emcee),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Sampler::Dynesty => "dynesty",
            Sampler::Nestle => "nestle",
            Sampler::Emcee => "emcee",
        }
    }

    pub fn kwargs(&self) -> &'static str {
        match self {
            Sampler::Dynesty => "{'nlive': 1000, 'nact': 10}",
            Sampler::Nestle => "{'nlive': 1000}",
            Sampler::Emcee => "{'nwalkers': 100, 'nsteps': 2000}",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    ImrPhenomPv2,
    ImrPhenomD,
    ImrPhenomXphm,
    SeobnrV4,
    ImrPhenomPv2NrTidal,
    TaylorF2,
}

impl Waveform {
    const ALL: [Waveform; 6] = [
        Waveform::ImrPhenomPv2,
        Waveform::ImrPhenomD,
        Waveform::ImrPhenomXphm,
        Waveform::SeobnrV4,
        Waveform::ImrPhenomPv2NrTidal,
        Waveform::TaylorF2,
    ];

    fn parse(name: Option<&str>) -> Waveform {
        let Some(name) = name else {
            debug!("No waveform model given, using IMRPhenomPv2");
            return Waveform::ImrPhenomPv2;
        };
        Waveform::from_name(name).unwrap_or_else(|| {
            warn!("Unknown waveform model {name:?}, falling back to IMRPhenomPv2");
            Waveform::ImrPhenomPv2
        })
    }

    fn from_name(name: &str) -> Option<Waveform> {
        Waveform::ALL
            .into_iter()
            .find(|waveform| waveform.approximant().eq_ignore_ascii_case(name.trim()))
    }

    pub fn approximant(&self) -> &'static str {
        match self {
            Waveform::ImrPhenomPv2 => "IMRPhenomPv2",
            Waveform::ImrPhenomD => "IMRPhenomD",
            Waveform::ImrPhenomXphm => "IMRPhenomXPHM",
            Waveform::SeobnrV4 => "SEOBNRv4",
            Waveform::ImrPhenomPv2NrTidal => "IMRPhenomPv2_NRTidal",
            Waveform::TaylorF2 => "TaylorF2",
        }
    }

    /// Tidal approximants need the neutron star source model
    pub fn source_model(&self) -> &'static str {
        match self {
            Waveform::ImrPhenomPv2NrTidal | Waveform::TaylorF2 => "bilby.gw.source.lal_binary_neutron_star",
            _ => "bilby.gw.source.lal_binary_black_hole",
        }
    }
}

/// A prior shipped with the installation, or a prior file somewhere on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriorChoice {
    Named(String),
    Path(PathBuf),
}

/// Translate a request into a run configuration
///
/// Never fails: malformed or missing values are replaced with defaults and logged.
pub fn translate(request: &SimulationRequest) -> RunConfig {
    let label = sanitise_label(&request.label);
    info!("Translating request {label}");

    let mut detectors: Vec<Detector> = [
        ("H1", &request.hanford),
        ("L1", &request.livingston),
        ("V1", &request.virgo),
    ]
    .into_iter()
    .filter(|(_, detector)| detector.selected.0)
    .map(|(name, detector)| translate_detector(name, detector))
    .collect();

    if detectors.is_empty() {
        warn!("No detectors selected, falling back to H1 and L1");
        detectors = vec![
            translate_detector("H1", &DetectorRequest::default()),
            translate_detector("L1", &DetectorRequest::default()),
        ];
    }

    RunConfig {
        label,
        detectors,
        duration: number_or(request.duration.as_ref(), "duration", DEFAULT_DURATION),
        sampling_frequency: number_or(request.sampling_frequency.as_ref(), "sampling_frequency", DEFAULT_SAMPLING_FREQUENCY),
        trigger_time: number_or(request.trigger_time.as_ref(), "trigger_time", DEFAULT_TRIGGER_TIME),
        data: request.data,
        sampler: Sampler::parse(request.sampler.as_deref()),
        waveform: Waveform::parse(request.waveform_model.as_deref()),
        prior: prior_choice(request.prior_file.as_deref()),
    }
}

fn translate_detector(name: &'static str, detector: &DetectorRequest) -> Detector {
    let minimum_frequency = number_or(detector.minimum_frequency.as_ref(), "minimum_frequency", DEFAULT_MINIMUM_FREQUENCY);
    let mut maximum_frequency = number_or(detector.maximum_frequency.as_ref(), "maximum_frequency", DEFAULT_MAXIMUM_FREQUENCY);
    if maximum_frequency <= minimum_frequency {
        warn!("{name} maximum frequency {maximum_frequency} isn't above minimum {minimum_frequency}, using {DEFAULT_MAXIMUM_FREQUENCY}");
        maximum_frequency = DEFAULT_MAXIMUM_FREQUENCY.max(minimum_frequency * 2.0);
    }

    let channel = match detector.channel.as_deref().map(str::trim) {
        Some(channel) if !channel.is_empty() => channel.to_string(),
        _ => DEFAULT_CHANNEL.to_string(),
    };

    Detector { name, minimum_frequency, maximum_frequency, channel }
}

/// Read a positive finite number sent as a JSON number or a numeric string
fn number_or(value: Option<&Value>, field: &str, default: f64) -> f64 {
    let parsed = match value {
        None | Some(Value::Null) => return default,
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(number) if number.is_finite() && number >= 0.0 => number,
        _ => {
            warn!("Malformed {field} {value:?}, using {default}");
            default
        }
    }
}

fn prior_choice(prior: Option<&str>) -> PriorChoice {
    match prior.map(str::trim) {
        None | Some("") => PriorChoice::Named(DEFAULT_PRIOR.to_string()),
        Some(name) if NAMED_PRIORS.contains(&name) => PriorChoice::Named(name.to_string()),
        Some(path) => PriorChoice::Path(PathBuf::from(path)),
    }
}

/// Labels end up in file names and job names, keep them to `[A-Za-z0-9_-]`
fn sanitise_label(label: &str) -> String {
    let clean: String = label
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if clean.is_empty() {
        DEFAULT_LABEL.to_string()
    } else {
        clean
    }
}
