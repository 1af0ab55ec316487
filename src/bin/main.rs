//! MWP data service binary.
//!
//! Loads configuration, writes the initial zeroed reports, runs the startup
//! cycle and then serves range requests arriving over MQTT until Ctrl-C.
//!
//! # Configuration
//!
//! Configuration can be provided through multiple sources, in order of precedence:
//!
//! 1. Command-line arguments (highest precedence)
//! 2. Environment variables (prefixed with `MWP_`)
//! 3. User-specified configuration file (via `--config`)
//! 4. System-wide configuration (`/etc/mwp-data-service/config.toml`)
//! 5. Default configuration (embedded in binary)
//!
//! ## Command-line Options
//!
//! ```text
//! Options:
//!   -c, --config <FILE>           Path to configuration file
//!   -v, --verbose                 Enable verbose (debug) logging
//!   -P, --production              Use production environment settings
//!   -D, --development             Use development environment settings (default)
//!   -r, --range <RANGE>           Initial range [default: 24h]
//!       --output-dir <DIR>        Directory for JSON and text reports [default: output]
//!       --influx-host <URL>       InfluxDB base URL [env: MWP_INFLUX_HOST]
//!       --influx-token <TOKEN>    InfluxDB API token [env: MWP_INFLUX_TOKEN]
//! ```
//!
//! ## Examples
//!
//! ```bash
//! mwp-data-service -D --range June
//! MWP_INFLUXDB__BUCKET=sensors mwp-data-service -P -c /etc/mwp/site.toml
//! ```

use clap::Parser;
use mwp_data_service::{
    config::{CliArgs, Settings},
    mqtt, CycleRunner, ModeController, MqttPublisher, ReportWriter, ServiceError, SummaryTable,
};
use mwp_query::{Aggregator, ControllerFilter, InfluxBackend};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &CliArgs, settings: &Settings) {
    let default_level = if cli.verbose {
        "debug"
    } else {
        settings.logging.level.as_str()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let cli_args = CliArgs::parse();

    // Load settings from config file and CLI args
    let settings = Settings::new(&cli_args).map_err(ServiceError::from)?;
    init_tracing(&cli_args, &settings);

    let environment = cli_args.environment();
    let startup_range = cli_args.startup_range().map_err(ServiceError::from)?;
    let mqtt_config = settings.mqtt(environment).map_err(ServiceError::from)?.clone();
    info!(environment, range = %startup_range, "starting mwp data service");

    let table = SummaryTable::initialize(settings.controllers.keys());
    let reports = Arc::new(ReportWriter::new(&cli_args.output_dir));
    if let Err(e) = reports
        .write_initial(&startup_range.to_string(), &table.snapshot(&settings.totals).await)
        .await
    {
        warn!("failed to write initial reports: {}", e);
    }

    let backend = Arc::new(InfluxBackend::new(&settings.influxdb).map_err(ServiceError::from)?);
    let aggregator = Aggregator::new(backend, &settings.influxdb);

    let (client, eventloop) = mqtt::connect(&mqtt_config);
    let cycles = CycleRunner::new(
        aggregator,
        ControllerFilter::controllers(settings.controllers.controller_ids()),
        table,
        settings.totals.clone(),
    )
    .with_publish_timeout(mqtt_config.publish_timeout())
    .with_publisher(reports)
    .with_publisher(Arc::new(MqttPublisher::new(client.clone(), &mqtt_config)));

    let (controller, handle) = ModeController::new(cycles, settings.live.clone(), startup_range);
    let controller_task = tokio::spawn(controller.run());
    let listener_task = tokio::spawn(mqtt::run_request_listener(
        eventloop,
        client,
        mqtt_config.request_topic.clone(),
        handle.clone(),
    ));

    info!(
        broker = %mqtt_config.host,
        port = mqtt_config.port,
        request_topic = %mqtt_config.request_topic,
        response_topic = %mqtt_config.response_topic,
        "listening for range requests"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    handle.shutdown();

    controller_task.await?;
    listener_task.await?;
    Ok(())
}
