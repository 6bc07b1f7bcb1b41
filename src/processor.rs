// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Frame-processing service.
//!
//! Single consumer of `frames_queue` (prefetch 1): decode the message, run
//! the DAG executor, update the stats, and acknowledge — exactly once, on
//! every exit path. Bad frames count as failures and are still acked; the
//! bus redelivers nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use image::RgbImage;
use lapin::message::Delivery;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::bus::{self, Bus, FrameMessage};
use crate::config::Config;
use crate::error::{ArgusError, Result};
use crate::nodes::FrameMeta;
use crate::pipeline::executor::PipelineExecutor;
use crate::stats::WorkerStats;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct ProcessorService {
    config: Config,
    executor: Arc<PipelineExecutor>,
    stats: WorkerStats,
}

impl ProcessorService {
    pub fn new(config: Config, executor: Arc<PipelineExecutor>) -> Self {
        let stats = WorkerStats::new(config.performance_log_interval);
        ProcessorService { config, executor, stats }
    }

    /// Consume frames forever, reconnecting on any bus failure.
    pub async fn run(&mut self) {
        info!(
            gateway = self.config.api_gateway_url,
            models = %self.config.models_path.display(),
            gpu = self.config.use_gpu,
            "Frame processing service starting"
        );

        loop {
            let bus = Bus::connect(&self.config.amqp_addr()).await;
            match self.consume(&bus).await {
                Ok(()) => warn!("Frame stream ended, reconnecting"),
                Err(e) => error!(error = %e, "Frame consumer failed, reconnecting"),
            }
            sleep(RECONNECT_DELAY).await;
        }
    }

    async fn consume(&mut self, bus: &Bus) -> Result<()> {
        let channel = bus.channel().await?;
        let mut consumer = bus::frame_consumer(&channel, "frame-processor").await?;
        info!("Ready to process frames");

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;
            self.handle_delivery(&delivery).await;
            // The one and only ack for this delivery.
            bus::ack(&delivery).await;
        }
        Ok(())
    }

    async fn handle_delivery(&mut self, delivery: &Delivery) {
        let started = Instant::now();
        match self.process_frame(&delivery.data).await {
            Ok(camera_name) => {
                let elapsed = started.elapsed();
                self.stats.record_processed(elapsed);
                if elapsed.as_secs_f64() > self.config.max_processing_time {
                    warn!(
                        camera = camera_name,
                        elapsed_secs = format!("{:.2}", elapsed.as_secs_f64()),
                        "Frame processing exceeded MAX_PROCESSING_TIME"
                    );
                }
            }
            Err(e) => {
                error!(error = %e, "Frame processing failed");
                self.stats.record_failed();
            }
        }
    }

    async fn process_frame(&self, payload: &[u8]) -> Result<String> {
        let message: FrameMessage = serde_json::from_slice(payload)?;
        let frame = decode_frame(&message)?;
        let meta = FrameMeta {
            camera_name: message.camera_name.clone(),
            timestamp: message.timestamp,
            width: frame.width(),
            height: frame.height(),
        };
        self.executor.execute(&frame, &message.camera_name, &meta).await?;
        Ok(message.camera_name)
    }

    /// Final report, called on shutdown.
    pub fn log_stats(&self) {
        self.stats.log();
    }
}

/// Hex → JPEG → RGB frame.
pub fn decode_frame(message: &FrameMessage) -> Result<RgbImage> {
    let jpeg = message.jpeg_bytes()?;
    let image = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| ArgusError::Frame(format!("JPEG decode failed: {e}")))?;
    Ok(image.to_rgb8())
}
