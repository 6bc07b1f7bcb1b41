// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Shared data types flowing between pipeline nodes.
//!
//! A node consumes a [`NodeData`] merged from its predecessors and produces a
//! new one. Every optional field uses `skip_serializing_if` so the `details`
//! JSON persisted with an event only carries what a node actually set.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel space: `[x1, y1, x2, y2]`.
pub type BBox = [f64; 4];

/// Centre of a box.
pub fn bbox_center(b: &BBox) -> [f64; 2] {
    [(b[0] + b[2]) / 2.0, (b[1] + b[3]) / 2.0]
}

/// Bottom-centre of a box — the point where an object touches the ground.
pub fn bbox_bottom_center(b: &BBox) -> [f64; 2] {
    [(b[0] + b[2]) / 2.0, b[3]]
}

/// Euclidean distance between two points.
pub fn point_distance(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// One detected object, progressively decorated as it flows through a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BBox,
    pub confidence: f64,
    pub class_name: String,
    pub class_id: i64,

    // Tracking decoration (objectDetection with enable_tracking).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trajectory_analysis: Option<serde_json::Value>,

    // Zone decoration (polygonFilter).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_dwell_time: Option<f64>,

    // Line-crossing decoration (directionFilter).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_crossed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crossing_direction: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_direction: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_level: Option<String>,

    // Loitering decoration (loiteringDetection).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loitering: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loitering_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loitering_confidence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracker_hits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_type: Option<String>,

    // Trajectory decoration (trajectoryAnalysis).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_position: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abnormal_behavior: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_complexity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dwell_analysis: Option<serde_json::Value>,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f64, class_name: impl Into<String>, class_id: i64) -> Self {
        Detection {
            bbox,
            confidence,
            class_name: class_name.into(),
            class_id,
            track_id: None,
            speed: None,
            direction: None,
            trajectory_length: None,
            movement_pattern: None,
            trajectory_analysis: None,
            zone_event: None,
            zone_dwell_time: None,
            line_crossed: None,
            crossing_direction: None,
            correct_direction: None,
            violation_type: None,
            alert_level: None,
            loitering: None,
            loitering_duration: None,
            loitering_confidence: None,
            tracker_hits: None,
            object_id: None,
            detection_type: None,
            predicted_position: None,
            abnormal_behavior: None,
            path_complexity: None,
            dwell_analysis: None,
        }
    }

    pub fn center(&self) -> [f64; 2] {
        bbox_center(&self.bbox)
    }
}

/// A detected face (faceDetector output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Face {
    #[serde(rename = "box")]
    pub bbox: BBox,
    pub confidence: f64,
}

/// Result of matching one embedding against the identity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identity {
    Match { name: String, similarity: f64 },
    Error { error: String },
}

/// A face embedding plus (after faceMatcher) its identity, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceEmbedding {
    #[serde(rename = "box")]
    pub bbox: BBox,
    pub embedding: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Option<Identity>>,
}

/// Alert summary emitted alongside wrong-way detections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: usize,
    pub severity: String,
    pub timestamp: f64,
}

/// Output of one node, merged field-wise (last write wins) into the input of
/// its successors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<Detection>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub faces: Option<Vec<Face>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<FaceEmbedding>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrong_way_detections: Option<Vec<Detection>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerts: Option<Vec<Alert>>,
}

impl NodeData {
    pub fn with_detections(detections: Vec<Detection>) -> Self {
        NodeData { detections: Some(detections), ..Default::default() }
    }

    /// Merge another node's output over this one. Present fields replace.
    pub fn merge_from(&mut self, other: &NodeData) {
        if let Some(d) = &other.detections {
            self.detections = Some(d.clone());
        }
        if let Some(f) = &other.faces {
            self.faces = Some(f.clone());
        }
        if let Some(e) = &other.embeddings {
            self.embeddings = Some(e.clone());
        }
        if let Some(w) = &other.wrong_way_detections {
            self.wrong_way_detections = Some(w.clone());
        }
        if let Some(a) = &other.alerts {
            self.alerts = Some(a.clone());
        }
    }

    pub fn detections(&self) -> &[Detection] {
        self.detections.as_deref().unwrap_or(&[])
    }

    pub fn faces(&self) -> &[Face] {
        self.faces.as_deref().unwrap_or(&[])
    }

    pub fn embeddings(&self) -> &[FaceEmbedding] {
        self.embeddings.as_deref().unwrap_or(&[])
    }
}

/// Zone occupancy counters published by a polygonFilter node.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ZoneStats {
    pub objects_in_zone: usize,
    pub new_entries: usize,
    pub exits: usize,
    pub zone_density: f64,
}

/// Traffic counters published by a directionFilter node.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrafficStats {
    pub correct_direction: u64,
    pub wrong_direction: u64,
    pub total_crossings: u64,
    pub wrong_way_ratio: f64,
}

/// Crowd flow summary published by a trajectoryAnalysis node.
#[derive(Debug, Clone, Serialize)]
pub struct CrowdSummary {
    pub object_count: usize,
    pub average_speed: f64,
    pub speed_deviation: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_direction: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density_center: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub density_spread: Option<[f64; 2]>,
    pub crowd_coherence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_last_write_wins_per_field() {
        let mut base = NodeData::with_detections(vec![Detection::new(
            [0.0, 0.0, 10.0, 10.0],
            0.9,
            "person",
            0,
        )]);
        base.alerts = Some(vec![]);

        let mut over = NodeData::default();
        over.detections = Some(vec![]);

        base.merge_from(&over);
        assert!(base.detections().is_empty(), "replaced by later writer");
        assert!(base.alerts.is_some(), "untouched field survives");
    }

    #[test]
    fn optional_fields_stay_out_of_json() {
        let det = Detection::new([1.0, 2.0, 3.0, 4.0], 0.5, "car", 2);
        let v = serde_json::to_value(&det).unwrap();
        assert!(v.get("track_id").is_none());
        assert_eq!(v["box"][3], 4.0);
    }
}
