// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Camera supervisor.
//!
//! Every 30 s the desired-set of active cameras is fetched from the gateway
//! and reconciled against the running capture workers: missing workers are
//! spawned, surplus workers are signalled to stop and joined. Each worker
//! captures frames from its RTSP source, JPEG-encodes them and publishes
//! `FrameMessage`s, capped at 10 Hz to bound bus pressure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::api::{CameraInfo, CameraLister};
use crate::bus::{publish_frame, BusPublisher, FrameMessage};
use crate::source::SourceFactory;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Publish cadence cap: one frame per 100 ms per camera.
const PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

struct WorkerEntry {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct CameraSupervisor {
    api: Arc<dyn CameraLister>,
    publisher: Arc<dyn BusPublisher>,
    sources: Arc<dyn SourceFactory>,
    workers: HashMap<String, WorkerEntry>,
}

impl CameraSupervisor {
    pub fn new(
        api: Arc<dyn CameraLister>,
        publisher: Arc<dyn BusPublisher>,
        sources: Arc<dyn SourceFactory>,
    ) -> Self {
        CameraSupervisor { api, publisher, sources, workers: HashMap::new() }
    }

    /// Reconcile forever. Cancelled by dropping the future (workers are
    /// stopped via `shutdown`).
    pub async fn run(&mut self) {
        loop {
            self.reconcile().await;
            sleep(RECONCILE_INTERVAL).await;
        }
    }

    /// One reconciliation tick. A fetch failure keeps the current set.
    pub async fn reconcile(&mut self) {
        let cameras = match self.api.list_cameras().await {
            Ok(cameras) => cameras,
            Err(e) => {
                error!(error = %e, "Could not sync cameras from gateway");
                return;
            }
        };

        let active: HashMap<String, CameraInfo> = cameras
            .into_iter()
            .filter(|c| c.is_active)
            .map(|c| (c.name.clone(), c))
            .collect();

        let running: HashSet<String> = self.workers.keys().cloned().collect();
        let desired: HashSet<String> = active.keys().cloned().collect();
        let (to_start, to_stop) = reconcile_diff(&running, &desired);

        for name in to_stop {
            if let Some(entry) = self.workers.remove(&name) {
                info!(camera = name, "Stopping capture worker");
                let _ = entry.stop.send(true);
                if let Err(e) = entry.handle.await {
                    warn!(camera = name, error = %e, "Capture worker join failed");
                }
            }
        }

        for name in to_start {
            let camera = &active[&name];
            info!(camera = name, "Starting capture worker");
            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(capture_loop(
                camera.name.clone(),
                camera.rtsp_url.clone(),
                self.sources.clone(),
                self.publisher.clone(),
                stop_rx,
            ));
            self.workers.insert(name, WorkerEntry { stop: stop_tx, handle });
        }
    }

    /// Number of live workers (monitoring, tests).
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn has_worker(&self, camera_name: &str) -> bool {
        self.workers.contains_key(camera_name)
    }

    /// Signal every worker and join them.
    pub async fn shutdown(&mut self) {
        info!("Camera supervisor shutting down");
        for (name, entry) in self.workers.drain() {
            let _ = entry.stop.send(true);
            if let Err(e) = entry.handle.await {
                warn!(camera = name, error = %e, "Capture worker join failed");
            }
            info!(camera = name, "Capture worker stopped");
        }
    }
}

/// Set difference of desired vs running workers.
pub fn reconcile_diff(
    running: &HashSet<String>,
    desired: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let mut to_start: Vec<String> = desired.difference(running).cloned().collect();
    let mut to_stop: Vec<String> = running.difference(desired).cloned().collect();
    to_start.sort();
    to_stop.sort();
    (to_start, to_stop)
}

/// Per-camera capture loop: open, read, encode, publish; retry after 5 s on
/// any source failure; release the source on every exit path.
async fn capture_loop(
    camera_name: String,
    rtsp_url: String,
    sources: Arc<dyn SourceFactory>,
    publisher: Arc<dyn BusPublisher>,
    mut stop: watch::Receiver<bool>,
) {
    info!(camera = camera_name, "Capture worker started");

    'outer: while !*stop.borrow() {
        let mut source = match sources.open(&camera_name, &rtsp_url) {
            Ok(s) => s,
            Err(e) => {
                warn!(camera = camera_name, error = %e, "Source open failed, retrying in 5s");
                if wait_or_stop(&mut stop, RETRY_DELAY).await {
                    break 'outer;
                }
                continue;
            }
        };

        loop {
            let frame = tokio::select! {
                _ = stop.changed() => break 'outer,
                frame = source.read_frame() => frame,
            };

            let Some(frame) = frame else {
                // Source ended; drop it and reconnect after the back-off.
                warn!(camera = camera_name, "Frame read failed, reconnecting in 5s");
                drop(source);
                if wait_or_stop(&mut stop, RETRY_DELAY).await {
                    break 'outer;
                }
                break;
            };

            match encode_jpeg(&frame) {
                Ok(jpeg) => {
                    let message = FrameMessage::new(&camera_name, epoch_seconds(), &jpeg);
                    if let Err(e) = publish_frame(publisher.as_ref(), &message).await {
                        error!(camera = camera_name, error = %e, "Frame publish failed");
                    }
                }
                Err(e) => error!(camera = camera_name, error = %e, "JPEG encode failed"),
            }

            if wait_or_stop(&mut stop, PUBLISH_INTERVAL).await {
                break 'outer;
            }
        }
    }

    info!(camera = camera_name, "Capture worker stopped");
}

/// Sleep, returning early with `true` if the stop signal fires.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = stop.changed() => true,
        _ = sleep(duration) => *stop.borrow(),
    }
}

fn encode_jpeg(frame: &image::RgbImage) -> crate::error::Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 80);
    encoder.encode_image(frame)?;
    Ok(jpeg)
}

fn epoch_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CameraInfo;
    use crate::error::Result;
    use crate::source::FrameSource;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn diff_computes_start_and_stop_sets() {
        let running = set(&["cam-A", "cam-B"]);
        let desired = set(&["cam-B", "cam-C"]);
        let (to_start, to_stop) = reconcile_diff(&running, &desired);
        assert_eq!(to_start, vec!["cam-C"]);
        assert_eq!(to_stop, vec!["cam-A"]);
    }

    #[test]
    fn diff_is_empty_at_steady_state() {
        let s = set(&["cam-A"]);
        let (to_start, to_stop) = reconcile_diff(&s, &s);
        assert!(to_start.is_empty());
        assert!(to_stop.is_empty());
    }

    struct ScriptedLister {
        responses: Mutex<Vec<Result<Vec<CameraInfo>>>>,
    }

    #[async_trait]
    impl CameraLister for ScriptedLister {
        async fn list_cameras(&self) -> Result<Vec<CameraInfo>> {
            self.responses.lock().remove(0)
        }
    }

    struct NullPublisher;

    #[async_trait]
    impl BusPublisher for NullPublisher {
        async fn publish(&self, _e: &str, _k: &str, _p: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn publish_durable(&self, _e: &str, _k: &str, _p: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    /// Source that never produces a frame but opens instantly.
    struct IdleSource;

    #[async_trait]
    impl FrameSource for IdleSource {
        async fn read_frame(&mut self) -> Option<image::RgbImage> {
            futures::future::pending::<()>().await;
            None
        }
    }

    struct IdleFactory;

    impl SourceFactory for IdleFactory {
        fn open(&self, _camera: &str, _url: &str) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(IdleSource))
        }
    }

    fn camera(name: &str, active: bool) -> CameraInfo {
        CameraInfo {
            id: 1,
            name: name.into(),
            rtsp_url: format!("rtsp://host/{name}"),
            is_active: active,
        }
    }

    #[tokio::test]
    async fn reconciliation_tracks_the_desired_set() {
        let lister = Arc::new(ScriptedLister {
            responses: Mutex::new(vec![
                Ok(vec![camera("cam-A", true), camera("cam-B", false)]),
                Ok(vec![camera("cam-A", true), camera("cam-B", true)]),
                Ok(vec![camera("cam-B", true)]),
                Err(crate::error::ArgusError::Frame("gateway down".into())),
            ]),
        });
        let mut supervisor =
            CameraSupervisor::new(lister, Arc::new(NullPublisher), Arc::new(IdleFactory));

        // Tick 1: only cam-A is active.
        supervisor.reconcile().await;
        assert_eq!(supervisor.worker_count(), 1);
        assert!(supervisor.has_worker("cam-A"));

        // Tick 2: cam-B activates.
        supervisor.reconcile().await;
        assert_eq!(supervisor.worker_count(), 2);

        // Tick 3: cam-A deactivates; its worker is stopped and joined.
        supervisor.reconcile().await;
        assert_eq!(supervisor.worker_count(), 1);
        assert!(supervisor.has_worker("cam-B"));

        // Tick 4: fetch failure keeps the current set.
        supervisor.reconcile().await;
        assert_eq!(supervisor.worker_count(), 1);

        supervisor.shutdown().await;
        assert_eq!(supervisor.worker_count(), 0);
    }
}
