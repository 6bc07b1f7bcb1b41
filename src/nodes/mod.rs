// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Processing operators.
//!
//! A node is a tagged variant keyed by the graph's `type` string. Stateful
//! nodes (zone, direction, trajectory) keep their history across frames;
//! the executor owns one instance per (pipeline, node id).

pub mod detection;
pub mod direction;
pub mod face;
pub mod loitering;
pub mod notify;
pub mod sink;
pub mod trajectory;
pub mod zone;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::HashMap;

use image::RgbImage;

use crate::api::IdentityMatcher;
use crate::bus::BusPublisher;
use crate::detection::{CrowdSummary, NodeData, TrafficStats, ZoneStats};
use crate::error::Result;
use crate::events::EventSink;
use crate::models::ModelRegistry;
use crate::pipeline::model::NodeSpec;
use crate::track::HybridTracker;

/// Infrastructure metadata travelling with one frame.
#[derive(Debug, Clone)]
pub struct FrameMeta {
    pub camera_name: String,
    /// Capture time, epoch seconds. Drives every behavioural clock.
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
}

/// Handles shared by all nodes of one pipeline during one frame.
pub struct SharedTools<'a> {
    pub models: &'a ModelRegistry,
    pub tracker: &'a mut HybridTracker,
    pub camera_name: &'a str,
    pub pipeline_id: i64,
    pub pipeline_name: &'a str,
    pub frame_meta: &'a FrameMeta,
    pub sink: &'a EventSink,
    pub matcher: &'a dyn IdentityMatcher,
    pub embedder: &'a face::FaceEmbedder,
    pub bus: Option<&'a dyn BusPublisher>,
    /// Per-frame analytics published by zone / direction / trajectory nodes,
    /// keyed by node id where applicable.
    pub zone_analytics: &'a mut HashMap<String, ZoneStats>,
    pub traffic_analytics: &'a mut HashMap<String, TrafficStats>,
    pub crowd_analysis: &'a mut Option<CrowdSummary>,
}

/// One executable operator instance.
pub enum Node {
    ObjectDetection(detection::DetectionNode),
    PolygonFilter(zone::PolygonFilterNode),
    DirectionFilter(direction::DirectionFilterNode),
    LoiteringDetection(loitering::LoiteringNode),
    TrajectoryAnalysis(trajectory::TrajectoryNode),
    DataSink(sink::DataSinkNode),
    Telegram(notify::TelegramNode),
    Email(notify::EmailNode),
    WhatsApp(notify::WhatsAppNode),
    Notification(notify::NotificationNode),
    FaceDetector(face::FaceDetectorNode),
    FaceEmbedding(face::FaceEmbeddingNode),
    FaceMatcher(face::FaceMatcherNode),
}

impl Node {
    /// Instantiate from a graph node. `None` for the videoInput sentinel and
    /// unknown types — those simply don't execute.
    pub fn from_spec(spec: &NodeSpec) -> Option<Node> {
        let node = match spec.node_type.as_str() {
            "objectDetection" => Node::ObjectDetection(detection::DetectionNode::new(spec)),
            "polygonFilter" => Node::PolygonFilter(zone::PolygonFilterNode::new(spec)),
            "directionFilter" => Node::DirectionFilter(direction::DirectionFilterNode::new(spec)),
            "loiteringDetection" => Node::LoiteringDetection(loitering::LoiteringNode::new(spec)),
            "trajectoryAnalysis" => Node::TrajectoryAnalysis(trajectory::TrajectoryNode::new(spec)),
            "dataSink" => Node::DataSink(sink::DataSinkNode::new(spec)),
            "telegram" => Node::Telegram(notify::TelegramNode::new(spec)),
            "email" => Node::Email(notify::EmailNode::new(spec)),
            "whatsapp" => Node::WhatsApp(notify::WhatsAppNode::new(spec)),
            "notification" => Node::Notification(notify::NotificationNode::new(spec)),
            "faceDetector" => Node::FaceDetector(face::FaceDetectorNode::new(spec)),
            "faceEmbedding" => Node::FaceEmbedding(face::FaceEmbeddingNode::new(spec)),
            "faceMatcher" => Node::FaceMatcher(face::FaceMatcherNode::new(spec)),
            _ => return None,
        };
        Some(node)
    }

    pub async fn execute(
        &mut self,
        frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        match self {
            Node::ObjectDetection(n) => n.execute(frame, input, tools),
            Node::PolygonFilter(n) => n.execute(frame, input, tools),
            Node::DirectionFilter(n) => n.execute(frame, input, tools),
            Node::LoiteringDetection(n) => n.execute(frame, input, tools),
            Node::TrajectoryAnalysis(n) => n.execute(frame, input, tools),
            Node::DataSink(n) => n.execute(frame, input, tools).await,
            Node::Telegram(n) => n.execute(frame, input, tools).await,
            Node::Email(n) => n.execute(frame, input, tools),
            Node::WhatsApp(n) => n.execute(frame, input, tools),
            Node::Notification(n) => n.execute(frame, input, tools).await,
            Node::FaceDetector(n) => n.execute(frame, input, tools),
            Node::FaceEmbedding(n) => n.execute(frame, input, tools),
            Node::FaceMatcher(n) => n.execute(frame, input, tools).await,
        }
    }
}
