// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! DAG executor.
//!
//! Resolves the pipeline bound to a camera, orders its graph topologically
//! (stable by node id, cycles rejected) and runs each node with inputs
//! merged from its predecessors. Per pipeline id the executor keeps a
//! runtime: one tracker plus the stateful node instances, created on first
//! execution and kept across frames.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use tracing::{error, info, warn};

use crate::api::IdentityMatcher;
use crate::bus::BusPublisher;
use crate::detection::NodeData;
use crate::error::{ArgusError, Result};
use crate::events::EventSink;
use crate::models::{ModelRegistry, DEFAULT_MODEL};
use crate::nodes::face::FaceEmbedder;
use crate::nodes::{FrameMeta, Node, SharedTools};
use crate::pipeline::cache::PipelineCache;
use crate::pipeline::model::{Graph, Pipeline, VIDEO_INPUT_TYPE};
use crate::track::{HybridTracker, TrackerConfig};

/// One pipeline's long-lived execution state.
struct PipelineRuntime {
    tracker: HybridTracker,
    nodes: HashMap<String, Node>,
    /// (id, type) pairs the node map was built from; a graph edit rebuilds
    /// the node instances (the tracker survives).
    signature: Vec<(String, String)>,
}

pub struct PipelineExecutor {
    cache: Arc<PipelineCache>,
    models: Arc<ModelRegistry>,
    sink: Arc<EventSink>,
    matcher: Arc<dyn IdentityMatcher>,
    embedder: Arc<FaceEmbedder>,
    bus: Option<Arc<dyn BusPublisher>>,
    tracker_config: TrackerConfig,
    max_processing_time: f64,
    runtimes: tokio::sync::Mutex<HashMap<i64, PipelineRuntime>>,
}

impl PipelineExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<PipelineCache>,
        models: Arc<ModelRegistry>,
        sink: Arc<EventSink>,
        matcher: Arc<dyn IdentityMatcher>,
        embedder: Arc<FaceEmbedder>,
        bus: Option<Arc<dyn BusPublisher>>,
        tracker_config: TrackerConfig,
        max_processing_time: f64,
    ) -> Self {
        PipelineExecutor {
            cache,
            models,
            sink,
            matcher,
            embedder,
            bus,
            tracker_config,
            max_processing_time,
            runtimes: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Execute the pipeline bound to `camera_name` against one frame.
    ///
    /// Returns `None` when no pipeline is configured. Node failures are
    /// contained (empty output, downstream continues); a cyclic graph is an
    /// error.
    pub async fn execute(
        &self,
        frame: &RgbImage,
        camera_name: &str,
        meta: &FrameMeta,
    ) -> Result<Option<HashMap<String, NodeData>>> {
        let Some(pipeline) = self.cache.get(camera_name).await else {
            return Ok(None);
        };

        let started = Instant::now();
        let order = topological_order(&pipeline.graph_data)?;

        self.preload_models(&pipeline);

        let mut runtimes = self.runtimes.lock().await;
        let runtime = runtimes.entry(pipeline.id).or_insert_with(|| {
            info!(pipeline = pipeline.id, "Initialising pipeline runtime");
            PipelineRuntime {
                tracker: HybridTracker::new(self.tracker_config.clone()),
                nodes: HashMap::new(),
                signature: Vec::new(),
            }
        });
        sync_runtime_nodes(runtime, &pipeline);

        let mut results: HashMap<String, NodeData> = HashMap::new();
        let mut zone_analytics = HashMap::new();
        let mut traffic_analytics = HashMap::new();
        let mut crowd_analysis = None;

        let PipelineRuntime { tracker, nodes, .. } = &mut *runtime;
        for node_id in &order {
            let Some(node) = nodes.get_mut(node_id) else { continue };

            // Merge predecessor outputs, last write wins in edge order.
            let mut input = NodeData::default();
            for edge in &pipeline.graph_data.edges {
                if &edge.target == node_id {
                    if let Some(prev) = results.get(&edge.source) {
                        input.merge_from(prev);
                    }
                }
            }

            let mut tools = SharedTools {
                models: &self.models,
                tracker: &mut *tracker,
                camera_name,
                pipeline_id: pipeline.id,
                pipeline_name: &pipeline.name,
                frame_meta: meta,
                sink: &self.sink,
                matcher: self.matcher.as_ref(),
                embedder: &self.embedder,
                bus: self.bus.as_deref(),
                zone_analytics: &mut zone_analytics,
                traffic_analytics: &mut traffic_analytics,
                crowd_analysis: &mut crowd_analysis,
            };

            match node.execute(frame, &input, &mut tools).await {
                Ok(output) => {
                    results.insert(node_id.clone(), output);
                }
                Err(e) => {
                    // Node failure is contained: empty output, graph continues.
                    error!(pipeline = pipeline.id, node = %node_id, error = %e, "Node failed");
                    results.insert(node_id.clone(), NodeData::default());
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > self.max_processing_time {
            warn!(
                camera = camera_name,
                pipeline = pipeline.id,
                elapsed_secs = format!("{elapsed:.2}"),
                limit_secs = self.max_processing_time,
                "Frame processing exceeded the soft deadline"
            );
        }

        Ok(Some(results))
    }

    /// Warm the registry for every objectDetection node of the pipeline.
    fn preload_models(&self, pipeline: &Pipeline) {
        for node in &pipeline.graph_data.nodes {
            if node.node_type == "objectDetection" {
                let filename = node.config_str("model_filename").unwrap_or(DEFAULT_MODEL);
                let _ = self.models.get(filename);
            }
        }
    }
}

/// Rebuild node instances when the stored graph changed shape.
fn sync_runtime_nodes(runtime: &mut PipelineRuntime, pipeline: &Pipeline) {
    let signature: Vec<(String, String)> = pipeline
        .graph_data
        .nodes
        .iter()
        .map(|n| (n.id.clone(), n.node_type.clone()))
        .collect();
    if runtime.signature == signature {
        return;
    }
    runtime.nodes = pipeline
        .graph_data
        .nodes
        .iter()
        .filter_map(|spec| Node::from_spec(spec).map(|n| (spec.id.clone(), n)))
        .collect();
    runtime.signature = signature;
}

/// Topological order of the graph, excluding the videoInput sentinel.
///
/// Ties break stably on node id. If any node is unreachable because of a
/// cycle (in-degree never drains), the graph is rejected.
pub fn topological_order(graph: &Graph) -> Result<Vec<String>> {
    let ids: BTreeSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for edge in &graph.edges {
        let (source, target) = (edge.source.as_str(), edge.target.as_str());
        if !ids.contains(source) || !ids.contains(target) {
            continue;
        }
        adjacency.entry(source).or_default().push(target);
        *in_degree.get_mut(target).unwrap() += 1;
    }

    let node_type: HashMap<&str, &str> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.node_type.as_str()))
        .collect();

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::new();
    let mut processed = 0usize;

    while let Some(id) = ready.iter().next().copied() {
        ready.remove(id);
        processed += 1;
        if node_type.get(id) != Some(&VIDEO_INPUT_TYPE) {
            order.push(id.to_string());
        }
        if let Some(successors) = adjacency.get(id) {
            for succ in successors {
                let d = in_degree.get_mut(succ).unwrap();
                *d -= 1;
                if *d == 0 {
                    ready.insert(*succ);
                }
            }
        }
    }

    if processed < graph.nodes.len() {
        return Err(ArgusError::Graph("pipeline graph contains a cycle".into()));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::{Edge, NodeSpec};
    use serde_json::json;

    fn node(id: &str, node_type: &str) -> NodeSpec {
        NodeSpec { id: id.into(), node_type: node_type.into(), data: json!({}) }
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge { source: source.into(), target: target.into() }
    }

    #[test]
    fn linear_graph_orders_and_skips_video_input() {
        let graph = Graph {
            nodes: vec![
                node("in", "videoInput"),
                node("det", "objectDetection"),
                node("sink", "dataSink"),
            ],
            edges: vec![edge("in", "det"), edge("det", "sink")],
        };
        assert_eq!(topological_order(&graph).unwrap(), vec!["det", "sink"]);
    }

    #[test]
    fn ties_break_stably_by_node_id() {
        let graph = Graph {
            nodes: vec![
                node("in", "videoInput"),
                node("b-filter", "polygonFilter"),
                node("a-filter", "polygonFilter"),
            ],
            edges: vec![edge("in", "b-filter"), edge("in", "a-filter")],
        };
        assert_eq!(topological_order(&graph).unwrap(), vec!["a-filter", "b-filter"]);
    }

    #[test]
    fn diamond_respects_dependencies() {
        let graph = Graph {
            nodes: vec![
                node("in", "videoInput"),
                node("det", "objectDetection"),
                node("zone", "polygonFilter"),
                node("dir", "directionFilter"),
                node("sink", "dataSink"),
            ],
            edges: vec![
                edge("in", "det"),
                edge("det", "zone"),
                edge("det", "dir"),
                edge("zone", "sink"),
                edge("dir", "sink"),
            ],
        };
        let order = topological_order(&graph).unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("det") < pos("zone"));
        assert!(pos("det") < pos("dir"));
        assert!(pos("zone") < pos("sink"));
        assert!(pos("dir") < pos("sink"));
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let graph = Graph {
            nodes: vec![node("a", "polygonFilter"), node("b", "directionFilter")],
            edges: vec![edge("a", "b"), edge("b", "a")],
        };
        assert!(matches!(topological_order(&graph), Err(ArgusError::Graph(_))));
    }

    #[test]
    fn edges_to_unknown_nodes_are_ignored() {
        let graph = Graph {
            nodes: vec![node("det", "objectDetection")],
            edges: vec![edge("ghost", "det")],
        };
        assert_eq!(topological_order(&graph).unwrap(), vec!["det"]);
    }
}
