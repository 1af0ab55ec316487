//! InfluxDB connection and query settings.

use crate::query::SensorFields;
use serde::Deserialize;
use std::time::Duration;

/// Settings for the InfluxDB v2 backend.
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxSettings {
    /// Base URL, e.g. `http://localhost:8086`
    pub host: String,
    /// API token (not logged)
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// Measurement holding the sensor readings
    #[serde(default = "default_measurement")]
    pub measurement: String,
    /// IANA zone applied to the query via `option location`
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub fields: SensorFields,
}

fn default_measurement() -> String {
    "mwp_sensors".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for InfluxSettings {
    fn default() -> Self {
        Self {
            host: "http://localhost:8086".to_string(),
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
            measurement: default_measurement(),
            timezone: None,
            request_timeout_secs: default_request_timeout_secs(),
            fields: SensorFields::default(),
        }
    }
}

impl InfluxSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Names of required settings that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("host", &self.host),
            ("token", &self.token),
            ("org", &self.org),
            ("bucket", &self.bucket),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields() {
        let settings = InfluxSettings {
            host: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "mwp".to_string(),
            bucket: " ".to_string(),
            measurement: default_measurement(),
            timezone: None,
            request_timeout_secs: default_request_timeout_secs(),
            fields: SensorFields::default(),
        };
        assert_eq!(settings.missing_fields(), vec!["token", "bucket"]);
    }
}
