// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! End-to-end executor tests: cache → DAG → nodes → sink, with every
//! external collaborator (gateway, broker, database, model files) stubbed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use argus::api::{IdentityMatcher, MatchResponse, PipelineFetcher};
use argus::bus::BusPublisher;
use argus::detection::Detection;
use argus::error::Result;
use argus::events::{EventSink, EventStore, NewEvent};
use argus::models::{Detect, ModelRegistry};
use argus::nodes::face::FaceEmbedder;
use argus::nodes::FrameMeta;
use argus::pipeline::cache::PipelineCache;
use argus::pipeline::executor::PipelineExecutor;
use argus::pipeline::model::Pipeline;
use argus::track::TrackerConfig;

// ──────────────── test doubles ────────────────────────────────────────────

struct StubFetcher {
    calls: AtomicUsize,
    pipelines: Mutex<Vec<Pipeline>>,
}

#[async_trait]
impl PipelineFetcher for StubFetcher {
    async fn pipelines_for_camera(&self, _camera: &str) -> Result<Vec<Pipeline>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pipelines.lock().clone())
    }
}

struct MemoryStore {
    events: Mutex<Vec<NewEvent>>,
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: &NewEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

struct MemoryPublisher {
    published: Mutex<Vec<(String, String, Vec<u8>)>>,
}

#[async_trait]
impl BusPublisher for MemoryPublisher {
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.published.lock().push((exchange.into(), routing_key.into(), payload.to_vec()));
        Ok(())
    }
    async fn publish_durable(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.publish(exchange, routing_key, payload).await
    }
}

struct NeverMatcher;

#[async_trait]
impl IdentityMatcher for NeverMatcher {
    async fn match_embedding(&self, _embedding: &[f32]) -> Result<MatchResponse> {
        Ok(MatchResponse { matched: false, name: None, similarity: None })
    }
}

/// Fixed detections on every frame.
struct FixedDetector(Vec<Detection>);

impl Detect for FixedDetector {
    fn detect(&self, _frame: &RgbImage) -> Vec<Detection> {
        self.0.clone()
    }
}

/// A scripted sequence of per-frame detections.
struct SequenceDetector(Mutex<VecDeque<Vec<Detection>>>);

impl Detect for SequenceDetector {
    fn detect(&self, _frame: &RgbImage) -> Vec<Detection> {
        self.0.lock().pop_front().unwrap_or_default()
    }
}

// ──────────────── harness ─────────────────────────────────────────────────

struct Rig {
    executor: PipelineExecutor,
    fetcher: Arc<StubFetcher>,
    cache: Arc<PipelineCache>,
    store: Arc<MemoryStore>,
    publisher: Arc<MemoryPublisher>,
    models: Arc<ModelRegistry>,
    media_dir: TempDir,
}

fn rig(pipeline: Pipeline) -> Rig {
    let fetcher = Arc::new(StubFetcher {
        calls: AtomicUsize::new(0),
        pipelines: Mutex::new(vec![pipeline]),
    });
    let cache = Arc::new(PipelineCache::new(fetcher.clone(), Duration::from_secs(300)));
    let models = Arc::new(ModelRegistry::new("/nonexistent", false));
    let store = Arc::new(MemoryStore { events: Mutex::new(Vec::new()) });
    let publisher = Arc::new(MemoryPublisher { published: Mutex::new(Vec::new()) });
    let media_dir = tempfile::tempdir().expect("create tempdir");
    let sink = Arc::new(EventSink::new(
        Some(store.clone() as Arc<dyn EventStore>),
        Some(publisher.clone() as Arc<dyn BusPublisher>),
        media_dir.path(),
    ));

    let executor = PipelineExecutor::new(
        cache.clone(),
        models.clone(),
        sink,
        Arc::new(NeverMatcher),
        Arc::new(FaceEmbedder::projection_only()),
        Some(publisher.clone() as Arc<dyn BusPublisher>),
        TrackerConfig::default(),
        5.0,
    );

    Rig { executor, fetcher, cache, store, publisher, models, media_dir }
}

fn meta(ts: f64) -> FrameMeta {
    FrameMeta { camera_name: "cam-A".into(), timestamp: ts, width: 640, height: 480 }
}

fn detection_pipeline() -> Pipeline {
    serde_json::from_value(json!({
        "id": 1,
        "name": "entrance-watch",
        "is_active": true,
        "graph_data": {
            "nodes": [
                {"id": "in", "type": "videoInput", "data": {"camera_name": "cam-A"}},
                {"id": "det", "type": "objectDetection",
                 "data": {"model_filename": "stub.onnx", "confidence": 0.9, "classes": ["person"]}},
                {"id": "save", "type": "dataSink", "data": {"event_type": "Person Alert"}}
            ],
            "edges": [
                {"source": "in", "target": "det"},
                {"source": "det", "target": "save"}
            ]
        }
    }))
    .expect("pipeline json")
}

// ──────────────── scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn fan_out_three_frames_three_events() {
    let rig = rig(detection_pipeline());
    rig.models.insert(
        "stub.onnx",
        Arc::new(FixedDetector(vec![
            Detection::new([10.0, 10.0, 50.0, 80.0], 0.95, "person", 0),
            Detection::new([100.0, 10.0, 180.0, 60.0], 0.5, "car", 2),
        ])),
    );

    let frame = RgbImage::from_pixel(640, 480, image::Rgb([80, 80, 80]));
    for i in 0..3 {
        let result = rig
            .executor
            .execute(&frame, "cam-A", &meta(i as f64))
            .await
            .expect("execute")
            .expect("pipeline bound");
        assert!(result.contains_key("det"));
        assert!(result.contains_key("save"));
    }

    // Three event rows, each holding only the high-confidence person.
    let events = rig.store.events.lock();
    assert_eq!(events.len(), 3);
    for event in events.iter() {
        assert_eq!(event.camera_name, "cam-A");
        assert_eq!(event.event_type, "Person Alert");
        let detections = event.details["detections"].as_array().unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0]["class_name"], "person");
        assert!(event.media_path.as_ref().unwrap().starts_with("/media/cam-A_"));
    }

    // Three JPEG snapshots on disk.
    let jpegs = std::fs::read_dir(rig.media_dir.path()).unwrap().count();
    assert_eq!(jpegs, 3);

    // Three WsEvents on the fanout exchange.
    let published = rig.publisher.published.lock();
    let ws_events: Vec<_> = published.iter().filter(|(ex, _, _)| ex == "ws_exchange").collect();
    assert_eq!(ws_events.len(), 3);
    let body: serde_json::Value = serde_json::from_slice(&ws_events[0].2).unwrap();
    assert_eq!(body["camera_name"], "cam-A");
    assert_eq!(body["event_type"], "Person Alert");
}

#[tokio::test]
async fn wrong_way_crossing_is_reported() {
    let pipeline: Pipeline = serde_json::from_value(json!({
        "id": 2,
        "name": "lane-watch",
        "is_active": true,
        "graph_data": {
            "nodes": [
                {"id": "in", "type": "videoInput", "data": {"camera_name": "cam-A"}},
                {"id": "det", "type": "objectDetection", "data": {"model_filename": "seq.onnx"}},
                {"id": "dir", "type": "directionFilter",
                 "data": {"line": [[0, 50], [100, 50]], "direction": [1, 0]}}
            ],
            "edges": [
                {"source": "in", "target": "det"},
                {"source": "det", "target": "dir"}
            ]
        }
    }))
    .unwrap();

    let rig = rig(pipeline);
    // Same tall object centred at (50, 20) then (50, 80): the boxes overlap
    // enough for the tracker to keep the id, and the centre path crosses
    // y = 50 heading down while only +x crossings are allowed.
    rig.models.insert(
        "seq.onnx",
        Arc::new(SequenceDetector(Mutex::new(VecDeque::from(vec![
            vec![Detection::new([30.0, -80.0, 70.0, 120.0], 0.9, "car", 2)],
            vec![Detection::new([30.0, -20.0, 70.0, 180.0], 0.9, "car", 2)],
        ])))),
    );

    let frame = RgbImage::new(640, 480);
    rig.executor.execute(&frame, "cam-A", &meta(0.0)).await.unwrap().unwrap();
    let result = rig.executor.execute(&frame, "cam-A", &meta(0.5)).await.unwrap().unwrap();

    let dir_out = &result["dir"];
    let wrong = dir_out.wrong_way_detections.as_ref().expect("wrong-way output");
    assert_eq!(wrong.len(), 1);
    assert_eq!(wrong[0].correct_direction, Some(false));
    let alerts = dir_out.alerts.as_ref().unwrap();
    assert_eq!(alerts[0].kind, "wrong_way_violation");
}

#[tokio::test]
async fn missing_pipeline_is_a_noop() {
    let rig = rig(detection_pipeline());
    *rig.fetcher.pipelines.lock() = Vec::new();

    let frame = RgbImage::new(64, 64);
    let result = rig.executor.execute(&frame, "cam-B", &meta(0.0)).await.unwrap();
    assert!(result.is_none());
    assert!(rig.store.events.lock().is_empty());
}

#[tokio::test]
async fn invalidation_forces_a_fresh_fetch_before_the_next_frame() {
    let rig = rig(detection_pipeline());
    rig.models.insert("stub.onnx", Arc::new(FixedDetector(Vec::new())));

    let frame = RgbImage::new(64, 64);
    rig.executor.execute(&frame, "cam-A", &meta(0.0)).await.unwrap();
    rig.executor.execute(&frame, "cam-A", &meta(1.0)).await.unwrap();
    assert_eq!(rig.fetcher.calls.load(Ordering::SeqCst), 1, "second frame is a cache hit");

    // The CRUD layer publishes `pipeline.updated` with body "cam-A"; the
    // listener drops the entry.
    rig.cache.invalidate("cam-A");

    rig.executor.execute(&frame, "cam-A", &meta(2.0)).await.unwrap();
    assert_eq!(rig.fetcher.calls.load(Ordering::SeqCst), 2, "fresh HTTP GET after invalidation");
}

#[tokio::test]
async fn cyclic_graph_is_rejected_at_execute() {
    let pipeline: Pipeline = serde_json::from_value(json!({
        "id": 3,
        "name": "broken",
        "is_active": true,
        "graph_data": {
            "nodes": [
                {"id": "in", "type": "videoInput", "data": {"camera_name": "cam-A"}},
                {"id": "a", "type": "polygonFilter", "data": {}},
                {"id": "b", "type": "directionFilter", "data": {}}
            ],
            "edges": [
                {"source": "in", "target": "a"},
                {"source": "a", "target": "b"},
                {"source": "b", "target": "a"}
            ]
        }
    }))
    .unwrap();

    let rig = rig(pipeline);
    let frame = RgbImage::new(64, 64);
    let result = rig.executor.execute(&frame, "cam-A", &meta(0.0)).await;
    assert!(result.is_err());
}
