// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Camera frame source using GStreamer.
//!
//! Each camera runs a pipeline:
//!   rtspsrc → decodebin → videoconvert → RGB appsink
//!
//! The appsink callback converts samples to `RgbImage`s and forwards them
//! through an async channel. Capture workers consume that channel and treat
//! the source as an opaque stream of decoded frames.

use async_trait::async_trait;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video::VideoInfo;
use image::RgbImage;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{ArgusError, Result};

/// A stream of decoded frames from one camera. Seam between the capture
/// worker and the RTSP driver.
#[async_trait]
pub trait FrameSource: Send {
    /// Next decoded frame; `None` when the stream ended or errored.
    async fn read_frame(&mut self) -> Option<RgbImage>;
}

/// Opens frame sources for RTSP URLs. The supervisor takes this as a seam so
/// reconciliation is testable without GStreamer.
pub trait SourceFactory: Send + Sync {
    fn open(&self, camera_name: &str, rtsp_url: &str) -> Result<Box<dyn FrameSource>>;
}

/// Handle to a running GStreamer pipeline for one RTSP camera.
pub struct RtspSource {
    camera_name: String,
    pipeline: gst::Pipeline,
    rx: mpsc::Receiver<RgbImage>,
}

impl RtspSource {
    pub fn connect(camera_name: &str, rtsp_url: &str) -> Result<Self> {
        gst::init().map_err(|e| ArgusError::Frame(format!("gst::init: {e}")))?;

        let (tx, rx) = mpsc::channel::<RgbImage>(8);

        let pipeline_str = format!(
            "rtspsrc location={rtsp_url} latency=200 protocols=tcp ! \
             decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=sink emit-signals=true max-buffers=8 drop=true sync=false"
        );

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| ArgusError::Frame(format!("parse_launch: {e}")))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| ArgusError::Frame("Not a pipeline".into()))?;

        let appsink: gst_app::AppSink = pipeline
            .by_name("sink")
            .ok_or_else(|| ArgusError::Frame("appsink not found".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| ArgusError::Frame("Cast to AppSink failed".into()))?;

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Error)?;
                    let Some(frame) = sample_to_image(&sample) else {
                        return Err(gst::FlowError::Error);
                    };
                    // Non-blocking send; drop the frame if the worker lags.
                    let _ = tx.try_send(frame);
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| ArgusError::Frame(format!("set_state Playing: {e}")))?;

        info!(camera = camera_name, url = rtsp_url, "GStreamer pipeline started");

        Ok(RtspSource { camera_name: camera_name.to_string(), pipeline, rx })
    }

    fn stop(&self) {
        let _ = self.pipeline.set_state(gst::State::Null);
        info!(camera = self.camera_name, "GStreamer pipeline stopped");
    }
}

#[async_trait]
impl FrameSource for RtspSource {
    async fn read_frame(&mut self) -> Option<RgbImage> {
        self.rx.recv().await
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Map an RGB sample to an `RgbImage`, honouring the row stride.
fn sample_to_image(sample: &gst::Sample) -> Option<RgbImage> {
    let caps = sample.caps()?;
    let info = VideoInfo::from_caps(caps).ok()?;
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;

    let width = info.width();
    let height = info.height();
    let stride = info.stride()[0] as usize;
    let row_bytes = width as usize * 3;
    let data = map.as_slice();

    let mut raw = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        raw.extend_from_slice(data.get(start..start + row_bytes)?);
    }
    let image = RgbImage::from_raw(width, height, raw)?;
    Some(image)
}

/// Production factory: one GStreamer pipeline per open call.
pub struct RtspSourceFactory;

impl SourceFactory for RtspSourceFactory {
    fn open(&self, camera_name: &str, rtsp_url: &str) -> Result<Box<dyn FrameSource>> {
        match RtspSource::connect(camera_name, rtsp_url) {
            Ok(source) => Ok(Box::new(source)),
            Err(e) => {
                warn!(camera = camera_name, error = %e, "Failed to open RTSP source");
                Err(e)
            }
        }
    }
}
