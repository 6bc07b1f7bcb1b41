// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Message bus plumbing.
//!
//! Topology (declared idempotently by every service that touches it):
//!   - queue `frames_queue` (non-durable): JSON [`FrameMessage`]s, camera → processor
//!   - queue `websocket_events` (non-durable): opaque JSON strings for the broadcaster
//!   - queue `notifications_queue` (durable messages): deferred notification sinks
//!   - topic exchange `config_events`, routing key `pipeline.updated`, body = camera name
//!   - fanout exchange `ws_exchange`: sinks publish compact WsEvents here

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::error::{ArgusError, Result};
use crate::pipeline::cache::PipelineCache;

pub const FRAMES_QUEUE: &str = "frames_queue";
pub const WEBSOCKET_QUEUE: &str = "websocket_events";
pub const NOTIFICATIONS_QUEUE: &str = "notifications_queue";
pub const CONFIG_EXCHANGE: &str = "config_events";
pub const WS_EXCHANGE: &str = "ws_exchange";
pub const PIPELINE_UPDATED_KEY: &str = "pipeline.updated";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One encoded frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMessage {
    pub camera_name: String,
    /// Capture time, epoch seconds.
    pub timestamp: f64,
    /// Hex-encoded JPEG bytes.
    pub frame: String,
}

impl FrameMessage {
    pub fn new(camera_name: impl Into<String>, timestamp: f64, jpeg: &[u8]) -> Self {
        FrameMessage {
            camera_name: camera_name.into(),
            timestamp,
            frame: hex::encode(jpeg),
        }
    }

    /// Decode the hex payload back into JPEG bytes.
    pub fn jpeg_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.frame).map_err(|e| ArgusError::Frame(format!("bad hex frame: {e}")))
    }
}

/// A live bus connection. Reconnection is the caller's loop; `connect` itself
/// retries forever with a fixed back-off so services survive a late broker.
pub struct Bus {
    connection: Connection,
}

impl Bus {
    pub async fn connect(amqp_addr: &str) -> Self {
        loop {
            match Connection::connect(amqp_addr, ConnectionProperties::default()).await {
                Ok(connection) => {
                    info!("Connected to message bus");
                    return Bus { connection };
                }
                Err(e) => {
                    warn!(error = %e, "Bus connection failed, retrying in 5s");
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Open a channel with the full topology declared.
    pub async fn channel(&self) -> Result<Channel> {
        let channel = self.connection.create_channel().await?;
        declare_topology(&channel).await?;
        Ok(channel)
    }
}

/// Declare every queue and exchange the platform uses.
pub async fn declare_topology(channel: &Channel) -> Result<()> {
    let transient = QueueDeclareOptions { durable: false, ..Default::default() };
    channel
        .queue_declare(FRAMES_QUEUE, transient, FieldTable::default())
        .await?;
    channel
        .queue_declare(WEBSOCKET_QUEUE, transient, FieldTable::default())
        .await?;
    channel
        .queue_declare(
            NOTIFICATIONS_QUEUE,
            QueueDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;
    channel
        .exchange_declare(
            CONFIG_EXCHANGE,
            ExchangeKind::Topic,
            ExchangeDeclareOptions { durable: false, ..Default::default() },
            FieldTable::default(),
        )
        .await?;
    channel
        .exchange_declare(
            WS_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions { durable: false, ..Default::default() },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Minimal publish capability, so sinks and tests don't need a live broker.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Transient publish (delivery mode 1).
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Persistent publish (delivery mode 2) for the durable queues.
    async fn publish_durable(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;
}

/// Publishes on a lapin channel with non-persistent delivery.
pub struct AmqpPublisher {
    channel: Channel,
}

impl AmqpPublisher {
    pub fn new(channel: Channel) -> Self {
        AmqpPublisher { channel }
    }
}

impl AmqpPublisher {
    async fn publish_with_mode(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        delivery_mode: u8,
    ) -> Result<()> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(delivery_mode),
            )
            .await?
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BusPublisher for AmqpPublisher {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.publish_with_mode(exchange, routing_key, payload, 1).await
    }

    async fn publish_durable(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.publish_with_mode(exchange, routing_key, payload, 2).await
    }
}

/// Publish one frame to the frames queue.
pub async fn publish_frame(publisher: &dyn BusPublisher, message: &FrameMessage) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    publisher.publish("", FRAMES_QUEUE, &payload).await
}

/// Seam the CRUD layer uses to broadcast pipeline mutations (spec: every
/// processor drops its cache entry for that camera).
#[async_trait]
pub trait ConfigUpdatePublisher: Send + Sync {
    async fn publish_update(&self, camera_name: &str) -> Result<()>;
}

pub struct AmqpConfigPublisher {
    channel: Channel,
}

impl AmqpConfigPublisher {
    pub fn new(channel: Channel) -> Self {
        AmqpConfigPublisher { channel }
    }
}

#[async_trait]
impl ConfigUpdatePublisher for AmqpConfigPublisher {
    async fn publish_update(&self, camera_name: &str) -> Result<()> {
        self.channel
            .basic_publish(
                CONFIG_EXCHANGE,
                PIPELINE_UPDATED_KEY,
                BasicPublishOptions::default(),
                camera_name.as_bytes(),
                BasicProperties::default().with_delivery_mode(1),
            )
            .await?
            .await?;
        info!(camera = camera_name, "Published pipeline update notification");
        Ok(())
    }
}

/// Start consuming the frames queue with prefetch 1 and manual acks.
pub async fn frame_consumer(channel: &Channel, tag: &str) -> Result<Consumer> {
    channel.basic_qos(1, BasicQosOptions::default()).await?;
    let consumer = channel
        .basic_consume(
            FRAMES_QUEUE,
            tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;
    Ok(consumer)
}

/// Consume the websocket fan-out queue, acking each message on receipt.
pub async fn websocket_consumer(channel: &Channel, tag: &str) -> Result<Consumer> {
    let consumer = channel
        .basic_consume(
            WEBSOCKET_QUEUE,
            tag,
            BasicConsumeOptions { no_ack: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;
    Ok(consumer)
}

/// Long-lived listener that invalidates the pipeline cache whenever a
/// `pipeline.updated` event names a camera. Reconnects forever.
pub async fn run_invalidation_listener(amqp_addr: String, cache: Arc<PipelineCache>) {
    loop {
        let bus = Bus::connect(&amqp_addr).await;
        match invalidation_loop(&bus, &cache).await {
            Ok(()) => warn!("Config event stream ended, reconnecting"),
            Err(e) => error!(error = %e, "Config event listener failed, reconnecting"),
        }
        sleep(RECONNECT_DELAY).await;
    }
}

async fn invalidation_loop(bus: &Bus, cache: &PipelineCache) -> Result<()> {
    let channel = bus.channel().await?;

    // Exclusive, auto-delete queue: each processor gets its own copy of
    // every config event.
    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions { exclusive: true, auto_delete: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            queue.name().as_str(),
            CONFIG_EXCHANGE,
            PIPELINE_UPDATED_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut consumer = channel
        .basic_consume(
            queue.name().as_str(),
            "config-listener",
            BasicConsumeOptions { no_ack: true, ..Default::default() },
            FieldTable::default(),
        )
        .await?;

    info!("Config update listener started");
    while let Some(delivery) = consumer.next().await {
        let delivery = delivery?;
        match std::str::from_utf8(&delivery.data) {
            Ok(camera_name) => {
                info!(camera = camera_name, "Invalidating cached pipeline");
                cache.invalidate(camera_name);
            }
            Err(e) => warn!(error = %e, "Ignoring non-UTF8 config event"),
        }
    }
    Ok(())
}

/// Acknowledge a frame delivery. Split out so call sites stay one line in
/// every exit path.
pub async fn ack(delivery: &lapin::message::Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        error!(error = %e, "Failed to ack frame delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_message_hex_round_trip() {
        let jpeg = vec![0xFFu8, 0xD8, 0x00, 0x42, 0xFF, 0xD9];
        let msg = FrameMessage::new("cam-A", 1234.5, &jpeg);
        assert_eq!(msg.jpeg_bytes().unwrap(), jpeg);

        // And through JSON, as it travels on the wire.
        let wire = serde_json::to_string(&msg).unwrap();
        let back: FrameMessage = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.camera_name, "cam-A");
        assert_eq!(back.jpeg_bytes().unwrap(), jpeg);
    }

    #[test]
    fn bad_hex_is_a_frame_error() {
        let msg = FrameMessage {
            camera_name: "cam-A".into(),
            timestamp: 0.0,
            frame: "zz-not-hex".into(),
        };
        assert!(msg.jpeg_bytes().is_err());
    }
}
