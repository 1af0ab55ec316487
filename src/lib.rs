//! MWP data service: irrigation sensor summaries over InfluxDB and MQTT.
//!
//! The service keeps an in-memory table of per-zone aggregates (flow,
//! runtime, pressure, temperature, current), refreshes it from InfluxDB on
//! request, and republishes each refreshed snapshot. A `live` request starts a
//! short session of one-second refreshes over the last minute that expires
//! back to the steady range.
//!
//! # Example
//!
//! ```rust,no_run
//! use mwp_data_service::{CycleRunner, LiveConfig, ModeController, ReportWriter, SummaryTable};
//! use mwp_query::{Aggregator, ControllerFilter, InfluxBackend, InfluxSettings, RangeToken};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let influx = InfluxSettings {
//!         host: "http://localhost:8086".into(),
//!         token: "token".into(),
//!         org: "mwp".into(),
//!         bucket: "sensors".into(),
//!         ..Default::default()
//!     };
//!     let backend = Arc::new(InfluxBackend::new(&influx)?);
//!     let table = SummaryTable::initialize(vec![("1", "1"), ("1", "2")]);
//!
//!     let cycles = CycleRunner::new(
//!         Aggregator::new(backend, &influx),
//!         ControllerFilter::controllers(["1"]),
//!         table,
//!         Vec::new(),
//!     )
//!     .with_publisher(Arc::new(ReportWriter::new("output")));
//!
//!     let (controller, handle) =
//!         ModeController::new(cycles, LiveConfig::default(), RangeToken::parse("24h")?);
//!     let task = tokio::spawn(controller.run());
//!
//!     handle.submit("live")?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     handle.shutdown();
//!     task.await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod controller;
pub mod cycle;
pub mod error;
pub mod mqtt;
pub mod publisher;
pub mod report;
pub mod table;

#[cfg(test)]
mod tests;

pub use config::{CliArgs, ControllerLayout, LiveConfig, MqttConfig, Settings, TotalSpec};
pub use controller::{ControlHandle, ControlSignal, ModeController, ModeState};
pub use cycle::{CycleError, CycleRunner};
pub use error::{ConfigurationError, PublishError, RequestError, ServiceError};
pub use mqtt::MqttPublisher;
pub use publisher::{CycleReport, Publisher};
pub use report::ReportWriter;
pub use table::{SummaryTable, TableSnapshot, ZoneMetrics};
