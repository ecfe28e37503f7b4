//! Submission requests and their translation into a run configuration

pub use crate::request::message::{Message, RequestError};
pub use crate::request::params::{DataSource, DetectorRequest, Flag, SimulationRequest};
pub use crate::request::translate::{translate, Detector, PriorChoice, RunConfig, Sampler, Waveform};

/// Read a request from a JSON file
pub mod message;
/// The request as the web layer sends it
pub mod params;
/// Default, sanitise and map request values onto pipeline settings
pub mod translate;
