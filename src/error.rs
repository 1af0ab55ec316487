use mwp_query::InvalidRangeError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Startup configuration problems. Fatal before the service starts, never
/// afterwards.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("influxdb configuration must set: {}", .0.join(", "))]
    MissingInflux(Vec<&'static str>),
    #[error("missing '{0}' environment configuration")]
    MissingEnvironment(String),
    #[error("controllers.total_controllers must be at least 1")]
    NoControllers,
    #[error("the live range is not permitted on startup; use a duration, month or year")]
    LiveStartupRange,
    #[error("invalid startup range: {0}")]
    StartupRange(#[from] InvalidRangeError),
}

/// Best-effort delivery failure of a cycle report.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("mqtt publish failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("publish did not complete within {0:?}")]
    Timeout(Duration),
    #[error("failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A request message that never reaches the controller.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("malformed request payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("request has an empty range")]
    EmptyRange,
    #[error(transparent)]
    InvalidRange(#[from] InvalidRangeError),
}

/// Fatal startup failures of the service binary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("failed to create influxdb client: {0}")]
    Backend(#[from] mwp_query::BackendError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}
