//! Configuration management for the data service.
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/mwp-data-service/config.toml`)
//! 3. User-specified configuration file (`--config`)
//! 4. Environment variables (prefixed with `MWP_`, `__` between sections,
//!    e.g. `MWP_INFLUXDB__TOKEN`)
//! 5. Command-line arguments
//!
//! The MQTT broker settings come from one of two named environments,
//! `development` and `production`, selected with `-D` or `-P`.

use crate::error::ConfigurationError;
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use mwp_query::{InfluxSettings, RangeToken};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");
const DEFAULT_CONFIG_PATH: &str = "/etc/mwp-data-service/config.toml";

pub const ENV_DEVELOPMENT: &str = "development";
pub const ENV_PRODUCTION: &str = "production";

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Use production environment settings
    #[arg(short = 'P', long, conflicts_with = "development")]
    pub production: bool,

    /// Use development environment settings (default)
    #[arg(short = 'D', long)]
    pub development: bool,

    /// Initial range (e.g. '24h', 'June', '2023'); 'live' is not allowed here
    #[arg(short, long, default_value = "24h")]
    pub range: String,

    /// Directory for JSON and text reports
    #[arg(long, value_name = "DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// InfluxDB base URL
    #[arg(long, env = "MWP_INFLUX_HOST")]
    pub influx_host: Option<String>,

    /// InfluxDB API token
    #[arg(long, env = "MWP_INFLUX_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,
}

impl CliArgs {
    /// Name of the selected environment. Defaults to development.
    pub fn environment(&self) -> &'static str {
        if self.production {
            ENV_PRODUCTION
        } else {
            if !self.development {
                warn!("neither -P nor -D specified, defaulting to development environment");
            }
            ENV_DEVELOPMENT
        }
    }

    /// The startup range, which must be a steady (non-live) range.
    pub fn startup_range(&self) -> Result<RangeToken, ConfigurationError> {
        match RangeToken::parse(&self.range)? {
            RangeToken::Live => Err(ConfigurationError::LiveStartupRange),
            token => Ok(token),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub influxdb: InfluxSettings,
    pub logging: LoggingConfig,
    pub controllers: ControllerLayout,
    pub live: LiveConfig,
    #[serde(default)]
    pub totals: Vec<TotalSpec>,
    pub environments: HashMap<String, EnvironmentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

/// Static controller/zone layout the summary table is built from.
///
/// Controllers are numbered `0..total_controllers`. Each has
/// `default_zones` zones unless listed in `special_controllers`, numbered
/// from `zone_start_index` unless listed in `zone_start_overrides`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerLayout {
    pub total_controllers: u32,
    pub default_zones: u32,
    pub zone_start_index: u32,
    #[serde(default)]
    pub special_controllers: HashMap<String, u32>,
    #[serde(default)]
    pub zone_start_overrides: HashMap<String, u32>,
}

impl ControllerLayout {
    /// Every configured (controller, zone) pair.
    pub fn keys(&self) -> Vec<(String, String)> {
        let mut keys = Vec::new();
        for controller in 0..self.total_controllers {
            let id = controller.to_string();
            let zones = self
                .special_controllers
                .get(&id)
                .copied()
                .unwrap_or(self.default_zones);
            let first = self
                .zone_start_overrides
                .get(&id)
                .copied()
                .unwrap_or(self.zone_start_index);
            for zone in first..first + zones {
                keys.push((id.clone(), zone.to_string()));
            }
        }
        keys
    }

    pub fn controller_ids(&self) -> Vec<String> {
        (0..self.total_controllers).map(|c| c.to_string()).collect()
    }
}

/// Live session timing.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    pub tick_interval_ms: u64,
    pub session_secs: u64,
}

impl LiveConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_secs)
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            session_secs: 60,
        }
    }
}

/// A named sum of `totalFlow` over a subset of the table.
///
/// An empty `zones` list covers every zone of the listed controllers.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TotalSpec {
    pub name: String,
    pub controllers: Vec<String>,
    #[serde(default)]
    pub zones: Vec<String>,
}

impl TotalSpec {
    pub fn covers(&self, controller: &str, zone: &str) -> bool {
        self.controllers.iter().any(|c| c == controller)
            && (self.zones.is_empty() || self.zones.iter().any(|z| z == zone))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    pub mqtt: MqttConfig,
}

/// MQTT broker connection and topics.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub client_id: String,
    pub request_topic: String,
    pub response_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_publish_timeout_ms() -> u64 {
    2000
}

impl MqttConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Settings {
    /// Loads configuration from all available sources and validates it.
    pub fn new(cli: &CliArgs) -> Result<Self, ConfigurationError> {
        let mut builder = Config::builder();

        // Load default configuration
        builder = builder.add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        // Load system configuration if it exists
        if let Ok(metadata) = std::fs::metadata(DEFAULT_CONFIG_PATH) {
            if metadata.is_file() {
                builder = builder.add_source(File::from(PathBuf::from(DEFAULT_CONFIG_PATH)));
            }
        }

        // Load user configuration if specified
        if let Some(ref config_path) = cli.config {
            builder = builder.add_source(File::from(config_path.clone()));
        }

        builder = builder.add_source(
            Environment::with_prefix("MWP")
                .prefix_separator("_")
                .separator("__"),
        );

        // Override with command line arguments
        if let Some(ref host) = cli.influx_host {
            builder = builder.set_override("influxdb.host", host.as_str())?;
        }
        if let Some(ref token) = cli.influx_token {
            builder = builder.set_override("influxdb.token", token.as_str())?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let missing = self.influxdb.missing_fields();
        if !missing.is_empty() {
            return Err(ConfigurationError::MissingInflux(missing));
        }
        for name in [ENV_DEVELOPMENT, ENV_PRODUCTION] {
            if !self.environments.contains_key(name) {
                return Err(ConfigurationError::MissingEnvironment(name.to_string()));
            }
        }
        if self.controllers.total_controllers == 0 {
            return Err(ConfigurationError::NoControllers);
        }
        Ok(())
    }

    pub fn mqtt(&self, environment: &str) -> Result<&MqttConfig, ConfigurationError> {
        self.environments
            .get(environment)
            .map(|env| &env.mqtt)
            .ok_or_else(|| ConfigurationError::MissingEnvironment(environment.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("mwp-data-service").chain(args.iter().copied()))
    }

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let file = config_file(
            r#"
            [influxdb]
            token = "secret"
            org = "mwp"
            bucket = "sensors"

            [controllers]
            total_controllers = 2
            "#,
        );
        let path = file.path().to_string_lossy().to_string();
        let settings = Settings::new(&cli(&["--config", &path])).unwrap();

        assert_eq!(settings.influxdb.bucket, "sensors");
        assert_eq!(settings.influxdb.host, "http://localhost:8086");
        assert_eq!(settings.controllers.total_controllers, 2);
        assert_eq!(settings.live.session_duration(), Duration::from_secs(60));
        assert_eq!(settings.totals.len(), 2);
        assert_eq!(settings.mqtt(ENV_PRODUCTION).unwrap().port, 1883);
    }

    #[test]
    fn test_missing_influx_settings_are_rejected() {
        let file = config_file("[influxdb]\norg = \"mwp\"\n");
        let path = file.path().to_string_lossy().to_string();
        let err = Settings::new(&cli(&["-c", &path])).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingInflux(ref m) if m == &vec!["token", "bucket"]));
    }

    #[test]
    fn test_layout_keys() {
        let layout = ControllerLayout {
            total_controllers: 3,
            default_zones: 2,
            zone_start_index: 1,
            special_controllers: HashMap::from([("2".to_string(), 3)]),
            zone_start_overrides: HashMap::from([("0".to_string(), 0)]),
        };
        let keys: Vec<(String, String)> = layout.keys();
        let expected: Vec<(String, String)> = [
            ("0", "0"),
            ("0", "1"),
            ("1", "1"),
            ("1", "2"),
            ("2", "1"),
            ("2", "2"),
            ("2", "3"),
        ]
        .iter()
        .map(|(c, z)| (c.to_string(), z.to_string()))
        .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_startup_range() {
        assert_eq!(
            cli(&["-r", "June"]).startup_range().unwrap(),
            RangeToken::parse("june").unwrap()
        );
        assert!(matches!(
            cli(&["--range", "live"]).startup_range(),
            Err(ConfigurationError::LiveStartupRange)
        ));
        assert!(matches!(
            cli(&["--range", "NOW"]).startup_range(),
            Err(ConfigurationError::LiveStartupRange)
        ));
        assert!(matches!(
            cli(&["--range", "soon"]).startup_range(),
            Err(ConfigurationError::StartupRange(_))
        ));
    }

    #[test]
    fn test_environment_selection() {
        assert_eq!(cli(&["-P"]).environment(), ENV_PRODUCTION);
        assert_eq!(cli(&["-D"]).environment(), ENV_DEVELOPMENT);
        assert_eq!(cli(&[]).environment(), ENV_DEVELOPMENT);
        assert!(CliArgs::try_parse_from(["mwp-data-service", "-P", "-D"]).is_err());
    }

    #[test]
    fn test_total_spec_covers() {
        let well = TotalSpec {
            name: "totalWell3Gallons".to_string(),
            controllers: vec!["3".to_string()],
            zones: vec!["1".to_string()],
        };
        assert!(well.covers("3", "1"));
        assert!(!well.covers("3", "2"));
        assert!(!well.covers("1", "1"));
    }
}
