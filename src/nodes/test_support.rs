//! Stub wiring for node unit tests: a full `SharedTools` with no broker,
//! database, gateway or model files behind it.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::api::{IdentityMatcher, MatchResponse};
use crate::detection::{CrowdSummary, TrafficStats, ZoneStats};
use crate::error::Result;
use crate::events::EventSink;
use crate::models::ModelRegistry;
use crate::nodes::face::FaceEmbedder;
use crate::nodes::{FrameMeta, SharedTools};
use crate::track::{HybridTracker, TrackerConfig};

pub struct StubMatcher {
    pub response: MatchResponse,
}

#[async_trait]
impl IdentityMatcher for StubMatcher {
    async fn match_embedding(&self, _embedding: &[f32]) -> Result<MatchResponse> {
        Ok(MatchResponse {
            matched: self.response.matched,
            name: self.response.name.clone(),
            similarity: self.response.similarity,
        })
    }
}

pub struct ToolHarness {
    pub models: ModelRegistry,
    pub tracker: HybridTracker,
    pub sink: EventSink,
    pub matcher: StubMatcher,
    pub embedder: FaceEmbedder,
    pub meta: FrameMeta,
    pub zone_analytics: HashMap<String, ZoneStats>,
    pub traffic_analytics: HashMap<String, TrafficStats>,
    pub crowd_analysis: Option<CrowdSummary>,
    pub pipeline_id: i64,
}

impl ToolHarness {
    pub fn new() -> Self {
        ToolHarness {
            models: ModelRegistry::new(std::env::temp_dir().join("argus-test-models"), false),
            tracker: HybridTracker::new(TrackerConfig::default()),
            sink: EventSink::new(None, None, std::env::temp_dir().join("argus-test-media")),
            matcher: StubMatcher {
                response: MatchResponse { matched: false, name: None, similarity: None },
            },
            embedder: FaceEmbedder::projection_only(),
            meta: FrameMeta { camera_name: "cam-A".into(), timestamp: 0.0, width: 640, height: 480 },
            zone_analytics: HashMap::new(),
            traffic_analytics: HashMap::new(),
            crowd_analysis: None,
            pipeline_id: 1,
        }
    }

    /// Run `f` with a `SharedTools` view over this harness.
    pub fn run<T>(&mut self, f: impl FnOnce(&mut SharedTools<'_>) -> T) -> T {
        let mut tools = SharedTools {
            models: &self.models,
            tracker: &mut self.tracker,
            camera_name: &self.meta.camera_name,
            pipeline_id: self.pipeline_id,
            pipeline_name: "test-pipeline",
            frame_meta: &self.meta,
            sink: &self.sink,
            matcher: &self.matcher,
            embedder: &self.embedder,
            bus: None,
            zone_analytics: &mut self.zone_analytics,
            traffic_analytics: &mut self.traffic_analytics,
            crowd_analysis: &mut self.crowd_analysis,
        };
        f(&mut tools)
    }
}
