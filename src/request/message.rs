use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde_json::Value;
use thiserror::Error;

use crate::request::params::SimulationRequest;

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Can't read request {}: {source}", .path.display())]
    Read { path: PathBuf, source: std::io::Error },

    #[error("Request {} isn't JSON: {source}", .path.display())]
    Decode { path: PathBuf, source: serde_json::Error },

    #[error("Request {} doesn't describe a simulation: {source}", .path.display())]
    Deserialise { path: PathBuf, source: serde_json::Error },
}

/// A submission request waiting on disk
pub struct Message {
    pub path: PathBuf,
}

impl Message {
    pub fn read(&self) -> Result<SimulationRequest, RequestError> {
        let json: Value = self.parse_untyped_json()?;
        self.parse_json(json)
    }

    fn read_file(&self) -> Result<String, RequestError> {
        let path: &Path = self.path.as_path();
        info!("Reading request at {}", path.display());
        fs::read_to_string(path).map_err(|source| {
            warn!("Can't read request at path {}: {}", path.display(), source);
            RequestError::Read { path: path.to_path_buf(), source }
        })
    }

    fn parse_untyped_json(&self) -> Result<Value, RequestError> {
        info!("Parsing JSON into untyped structure");
        let json_string = self.read_file()?;
        serde_json::from_str::<Value>(&json_string)
            .map_err(|source| RequestError::Decode { path: self.path.clone(), source })
    }

    fn parse_json(&self, value: Value) -> Result<SimulationRequest, RequestError> {
        info!("Deserialising JSON into a simulation request");
        // from_value is generic, so ask for SimulationRequest specifically
        serde_json::from_value::<SimulationRequest>(value)
            .map_err(|source| RequestError::Deserialise { path: self.path.clone(), source })
    }
}
