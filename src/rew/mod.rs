//! Talking to REW, the measurement tool being automated.
//!
//! [`MeasurementTool`] is everything the workflow needs from REW's HTTP API.
//! [`http::RewClient`] is the real thing, [`dummy::DummyRew`] is an in-memory
//! stand-in for running without REW.

pub mod dummy;
pub mod http;

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

pub use dummy::DummyRew;
pub use http::RewClient;

/// Where REW listens by default.
pub const DEFAULT_BASE_URL: &str = "http://localhost:4735";

/// Failures talking to REW.
#[derive(Debug, Error)]
pub enum RewError {
    /// The request never got a response.
    #[error("request to {endpoint} failed: {source}")]
    Network {
        /// The API path.
        endpoint: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// REW answered with a non-success status.
    #[error("{endpoint} returned status {status}")]
    Status {
        /// The API path.
        endpoint: String,
        /// HTTP status REW returned.
        status: u16,
    },
    /// REW answered with something we could not make sense of.
    #[error("unexpected response from {endpoint}: {reason}")]
    Parse {
        /// The API path.
        endpoint: String,
        /// What did not parse.
        reason: String,
    },
    /// REW is not there. Only produced by the simulated backend.
    #[error("{0} is unavailable")]
    Unavailable(String),
}

/// A warning or error REW raised, identified by its timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemRecord {
    /// When REW logged it, unique per problem.
    pub time: String,
    /// Short description.
    pub title: String,
    /// Details, if any.
    pub message: Option<String>,
}

impl ProblemRecord {
    /// Read one entry of REW's warnings or errors list. Missing fields become
    /// empty strings; a numeric `time` is kept in its JSON spelling.
    pub fn from_value(value: &Value) -> Self {
        let text = |key: &str| match value.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self {
            time: text("time"),
            title: text("title"),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }
}

/// Problems that appeared since a baseline, plus everything REW currently
/// reports, in REW's own order.
pub type ProblemDiff = (HashSet<String>, Vec<ProblemRecord>);

/// The part of a measurement summary used for microphone centering.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementSummary {
    /// REW's id for the measurement.
    #[serde(default)]
    pub uuid: Option<String>,
    /// Measurement name.
    #[serde(default)]
    pub title: Option<String>,
    /// Arrival time of the impulse response peak, in seconds.
    #[serde(rename = "timeOfIRPeakSeconds", alias = "timeOfImpulsePeakSeconds", default)]
    pub time_of_ir_peak_seconds: Option<f64>,
    /// Start of the impulse response window, in seconds.
    #[serde(rename = "timeOfIRStartSeconds", default)]
    pub time_of_ir_start_seconds: Option<f64>,
}

/// Everything the workflow asks of REW.
pub trait MeasurementTool {
    /// Whether the API answers its health check. Never fails.
    fn is_online(&self) -> bool;

    /// One readable explanation per REW setting that differs from what the
    /// automation needs. Fetch failures are reported inline, never abort.
    fn check_configuration(&self) -> Vec<String>;

    /// Current warnings followed by current errors.
    fn poll_problems(&self) -> Result<Vec<ProblemRecord>, RewError>;

    /// Timestamps not in `prior`, and the full current problem list.
    fn new_problems_since(&self, prior: &HashSet<String>) -> Result<ProblemDiff, RewError> {
        let problems = self.poll_problems()?;
        let new_times = problems
            .iter()
            .map(|p| p.time.clone())
            .filter(|t| !prior.contains(t))
            .collect();
        Ok((new_times, problems))
    }

    /// The selected measurement, which REW keeps on the newest one.
    fn selected_measurement_id(&self) -> Option<String>;

    /// Remove a measurement.
    fn delete_measurement(&self, id: &str) -> Result<(), RewError>;

    /// Summary of one measurement.
    fn measurement_summary(&self, id: &str) -> Result<MeasurementSummary, RewError>;

    /// Identifiers of every measurement REW holds.
    fn measurement_ids(&self) -> Result<Vec<String>, RewError>;
}

impl<T: MeasurementTool + ?Sized> MeasurementTool for Box<T> {
    fn is_online(&self) -> bool {
        (**self).is_online()
    }
    fn check_configuration(&self) -> Vec<String> {
        (**self).check_configuration()
    }
    fn poll_problems(&self) -> Result<Vec<ProblemRecord>, RewError> {
        (**self).poll_problems()
    }
    fn new_problems_since(&self, prior: &HashSet<String>) -> Result<ProblemDiff, RewError> {
        (**self).new_problems_since(prior)
    }
    fn selected_measurement_id(&self) -> Option<String> {
        (**self).selected_measurement_id()
    }
    fn delete_measurement(&self, id: &str) -> Result<(), RewError> {
        (**self).delete_measurement(id)
    }
    fn measurement_summary(&self, id: &str) -> Result<MeasurementSummary, RewError> {
        (**self).measurement_summary(id)
    }
    fn measurement_ids(&self) -> Result<Vec<String>, RewError> {
        (**self).measurement_ids()
    }
}

/// A value a REW setting must have.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expected {
    /// Must equal this string.
    Text(&'static str),
    /// Must equal this flag.
    Flag(bool),
}

impl Expected {
    fn matches(&self, actual: Option<&Value>) -> bool {
        match (self, actual) {
            (Expected::Text(s), Some(Value::String(a))) => a == s,
            (Expected::Flag(b), Some(Value::Bool(a))) => a == b,
            _ => false,
        }
    }
}

/// One setting checked before measuring.
#[derive(Debug, Clone, Copy)]
pub struct SettingCheck {
    /// API path, relative to the base URL.
    pub endpoint: &'static str,
    /// Field within the response. `body` when REW answers with a bare value.
    pub key: &'static str,
    /// The value the field must have.
    pub expected: Expected,
    /// What to tell the user when it is wrong.
    pub explanation: &'static str,
}

/// The REW settings the automation depends on.
pub const SETTING_CHECKS: &[SettingCheck] = &[
    SettingCheck {
        endpoint: "/measure/naming",
        key: "namingOption",
        expected: Expected::Text("Use as entered"),
        explanation: "The naming option radio-buttons in Measure should be set to 'Use as entered'.",
    },
    SettingCheck {
        endpoint: "/measure/naming",
        key: "prefixMeasNameWithOutput",
        expected: Expected::Flag(false),
        explanation: "The checkbox 'Prefix with output' in Measure should be unchecked.",
    },
    SettingCheck {
        endpoint: "/measure/playback-mode",
        key: "message",
        expected: Expected::Text("From file"),
        explanation: "Playback mode in Measure should be set to 'From file'.",
    },
    SettingCheck {
        endpoint: "/measure/protection-options",
        key: "clippingAbort",
        expected: Expected::Flag(true),
        explanation: "The checkbox 'Abort if heavy input clipping occurs' in Measure should be checked.",
    },
    SettingCheck {
        endpoint: "/measure/capture-noise-floor",
        key: "body",
        expected: Expected::Flag(true),
        explanation: "The checkbox 'Capture noise floor' in Measure should be checked.",
    },
];

/// Distinct endpoints of [`SETTING_CHECKS`], in order.
pub fn setting_endpoints() -> Vec<&'static str> {
    let mut endpoints: Vec<&'static str> = Vec::new();
    for check in SETTING_CHECKS {
        if !endpoints.contains(&check.endpoint) {
            endpoints.push(check.endpoint);
        }
    }
    endpoints
}

/// Compare one endpoint's response against the checks for it. A bare
/// non-object response is looked up under the `body` key.
pub fn compare_settings(endpoint: &str, response: &Value) -> Vec<String> {
    let wrapped;
    let response = if response.is_object() {
        response
    } else {
        wrapped = serde_json::json!({ "body": response });
        &wrapped
    };

    SETTING_CHECKS
        .iter()
        .filter(|c| c.endpoint == endpoint)
        .filter_map(|c| {
            let actual = response.get(c.key);
            if c.expected.matches(actual) {
                None
            } else {
                let shown = actual.map(Value::to_string).unwrap_or_else(|| "null".to_owned());
                Some(format!(
                    "{} It is currently set to {shown}.",
                    c.explanation
                ))
            }
        })
        .collect()
}

/// Turn a warnings or errors response into records. Anything but a list
/// counts as no problems.
pub fn problems_from_value(value: &Value) -> Vec<ProblemRecord> {
    match value {
        Value::Array(items) => items.iter().map(ProblemRecord::from_value).collect(),
        _ => Vec::new(),
    }
}

/// Measurement identifiers from the `/measurements` response, which REW
/// sends as an object keyed by index.
pub fn measurement_ids_from_value(value: &Value) -> Vec<String> {
    let uuid = |v: &Value| v.get("uuid").and_then(Value::as_str).map(str::to_owned);
    match value {
        Value::Object(map) => map.values().filter_map(uuid).collect(),
        Value::Array(items) => items.iter().filter_map(uuid).collect(),
        _ => Vec::new(),
    }
}
