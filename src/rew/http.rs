//! [`MeasurementTool`] over REW's local HTTP API.

use super::{
    compare_settings, measurement_ids_from_value, problems_from_value, setting_endpoints,
    MeasurementSummary, MeasurementTool, ProblemRecord, RewError,
};
use log::{debug, warn};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

const VERSION_ENDPOINT: &str = "/version";
const WARNINGS_ENDPOINT: &str = "/application/warnings";
const ERRORS_ENDPOINT: &str = "/application/errors";
const SELECTED_ENDPOINT: &str = "/measurements/selected-uuid";
const MEASUREMENTS_ENDPOINT: &str = "/measurements";

/// How long the health check waits.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Default timeout for every other request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking client for a REW instance.
#[derive(Debug, Clone)]
pub struct RewClient {
    base_url: String,
    http: Client,
}

impl RewClient {
    /// A client for REW at `base_url`, e.g. `http://localhost:4735`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RewError> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RewError::Network {
                endpoint: base_url.clone(),
                source,
            })?;
        Ok(Self { base_url, http })
    }

    /// The base URL requests go to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn checked(endpoint: &str, response: Response) -> Result<Response, RewError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(RewError::Status {
                endpoint: endpoint.to_owned(),
                status: status.as_u16(),
            })
        }
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, RewError> {
        debug!("GET {endpoint}");
        let network = |source| RewError::Network {
            endpoint: endpoint.to_owned(),
            source,
        };
        let response = self.http.get(self.url(endpoint)).send().map_err(network)?;
        Self::checked(endpoint, response)?
            .json::<T>()
            .map_err(|e| RewError::Parse {
                endpoint: endpoint.to_owned(),
                reason: e.to_string(),
            })
    }

    fn problem_list(&self, endpoint: &str) -> Result<Vec<ProblemRecord>, RewError> {
        let value: Value = self.get(endpoint)?;
        Ok(problems_from_value(&value))
    }
}

impl MeasurementTool for RewClient {
    fn is_online(&self) -> bool {
        match self
            .http
            .get(self.url(VERSION_ENDPOINT))
            .timeout(HEALTH_TIMEOUT)
            .send()
        {
            Ok(response) => response.status().as_u16() == 200,
            Err(e) => {
                debug!("REW health check failed: {e}");
                false
            }
        }
    }

    fn check_configuration(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for endpoint in setting_endpoints() {
            match self.get::<Value>(endpoint) {
                Ok(response) => errors.extend(compare_settings(endpoint, &response)),
                Err(e) => errors.push(format!("Failed to fetch {endpoint}: {e}")),
            }
        }
        errors
    }

    fn poll_problems(&self) -> Result<Vec<ProblemRecord>, RewError> {
        let mut problems = self.problem_list(WARNINGS_ENDPOINT)?;
        problems.extend(self.problem_list(ERRORS_ENDPOINT)?);
        Ok(problems)
    }

    fn selected_measurement_id(&self) -> Option<String> {
        match self.get::<Value>(SELECTED_ENDPOINT) {
            Ok(value) => value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned),
            Err(e) => {
                warn!("Could not read the selected measurement: {e}");
                None
            }
        }
    }

    fn delete_measurement(&self, id: &str) -> Result<(), RewError> {
        let endpoint = format!("{MEASUREMENTS_ENDPOINT}/{id}");
        debug!("DELETE {endpoint}");
        let response = self
            .http
            .delete(self.url(&endpoint))
            .send()
            .map_err(|source| RewError::Network {
                endpoint: endpoint.clone(),
                source,
            })?;
        Self::checked(&endpoint, response)?;
        Ok(())
    }

    fn measurement_summary(&self, id: &str) -> Result<MeasurementSummary, RewError> {
        self.get(&format!("{MEASUREMENTS_ENDPOINT}/{id}"))
    }

    fn measurement_ids(&self) -> Result<Vec<String>, RewError> {
        let value: Value = self.get(MEASUREMENTS_ENDPOINT)?;
        Ok(measurement_ids_from_value(&value))
    }
}
