use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A parameter estimation request as sent by the web layer
///
/// Numeric fields are kept as raw JSON because the web layer sends numbers as strings about as
/// often as numbers. Translation defaults anything malformed instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationRequest {
    pub label: String,
    pub hanford: DetectorRequest,
    pub livingston: DetectorRequest,
    pub virgo: DetectorRequest,
    pub duration: Option<Value>,
    pub sampling_frequency: Option<Value>,
    pub trigger_time: Option<Value>,
    /// Simulated (gaussian noise) or real (open) data
    pub data: DataSource,
    pub sampler: Option<String>,
    pub prior_file: Option<String>,
    pub waveform_model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorRequest {
    pub selected: Flag,
    pub minimum_frequency: Option<Value>,
    pub maximum_frequency: Option<Value>,
    pub channel: Option<String>,
}

/// A selection flag sent either as a JSON boolean or as a `"true"` / `"false"` string marker
///
/// Anything else counts as not selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Flag(pub bool);

impl<'de> Deserialize<'de> for Flag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let selected = match Value::deserialize(deserializer)? {
            Value::Bool(selected) => selected,
            Value::String(marker) => marker.trim().eq_ignore_ascii_case("true"),
            _ => false,
        };
        Ok(Flag(selected))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Simulated,
    Real,
}

impl<'de> Deserialize<'de> for DataSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = match Value::deserialize(deserializer)? {
            Value::String(choice) => match choice.trim().to_ascii_lowercase().as_str() {
                "real" | "open" => DataSource::Real,
                _ => DataSource::Simulated,
            },
            Value::Bool(false) => DataSource::Real,
            _ => DataSource::Simulated,
        };
        Ok(source)
    }
}
