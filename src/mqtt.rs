//! MQTT request intake and response publishing.

use crate::config::MqttConfig;
use crate::controller::{ControlHandle, ModeState};
use crate::error::{PublishError, RequestError};
use crate::publisher::{CycleReport, Publisher};
use async_trait::async_trait;
use mwp_query::RangeToken;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const CLIENT_CAPACITY: usize = 16;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Inbound request body: `{"range": "<token>"}`.
#[derive(Debug, Deserialize)]
pub struct RangeRequest {
    pub range: String,
}

/// Decodes a request payload into a range token.
pub fn parse_request(payload: &[u8]) -> Result<RangeToken, RequestError> {
    let request: RangeRequest = serde_json::from_slice(payload)?;
    if request.range.trim().is_empty() {
        return Err(RequestError::EmptyRange);
    }
    Ok(RangeToken::parse(&request.range)?)
}

/// Builds the client and its event loop. Nothing connects until the event
/// loop is polled.
pub fn connect(config: &MqttConfig) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user, pass);
    }
    AsyncClient::new(options, CLIENT_CAPACITY)
}

/// Publishes each cycle's snapshot to the response topic.
///
/// A publish completes once the message is queued for the event loop. Broker
/// delivery is not confirmed; the timeout only bounds waiting for room in the
/// client's request queue.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    timeout: Duration,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, config: &MqttConfig) -> Self {
        Self {
            client,
            topic: config.response_topic.clone(),
            timeout: config.publish_timeout(),
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn publish(&self, report: &CycleReport) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(&report.snapshot)?;
        let size = payload.len();
        tokio::time::timeout(
            self.timeout,
            self.client
                .publish(&self.topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        .map_err(|_| PublishError::Timeout(self.timeout))??;

        debug!(topic = %self.topic, bytes = size, range = %report.range, "response published");
        Ok(())
    }
}

/// Drives the MQTT event loop until the controller stops.
///
/// The request topic is subscribed again on every ConnAck, so a broker
/// restart does not silently drop the subscription. Connection errors are
/// retried after a back-off that doubles up to [`MAX_BACKOFF`].
pub async fn run_request_listener(
    mut eventloop: EventLoop,
    client: AsyncClient,
    request_topic: String,
    handle: ControlHandle,
) {
    let mut mode = handle.watch_mode();
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let event = tokio::select! {
            changed = mode.changed() => {
                let stopped = *mode.borrow() == ModeState::Stopped;
                if changed.is_err() || stopped {
                    break;
                }
                continue;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff = INITIAL_BACKOFF;
                info!(topic = %request_topic, "connected to broker, subscribing");
                if let Err(e) = client.try_subscribe(&request_topic, QoS::AtLeastOnce) {
                    error!("failed to subscribe to '{}': {}", request_topic, e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(message))) => {
                if message.topic != request_topic {
                    continue;
                }
                match parse_request(&message.payload) {
                    Ok(range) => {
                        info!(range = %range, "range request received");
                        handle.request(range);
                    }
                    Err(e) => warn!("dropping request on '{}': {}", message.topic, e),
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt connection error: {}; retrying in {:?}", e, backoff);
                if stopped_during(&mut mode, backoff).await {
                    break;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        debug!("mqtt disconnect: {}", e);
    }
    info!("mqtt listener stopped");
}

/// Waits out `delay` unless the controller stops first. Returns `true` when
/// it stopped or went away.
async fn stopped_during(mode: &mut watch::Receiver<ModeState>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = async { mode.wait_for(|m| *m == ModeState::Stopped).await.map(|_| ()) } => true,
    }
}
