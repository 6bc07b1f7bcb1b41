// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! directionFilter — line-crossing analysis with wrong-way detection.
//!
//! Tracked objects accumulate a short position history; when two consecutive
//! positions cross the configured line segment, the movement unit vector is
//! compared against the allowed direction. `dot > 0.5` is a correct
//! crossing; anything else is a wrong-way violation.

use std::collections::{HashMap, VecDeque};

use image::RgbImage;
use tracing::{debug, warn};

use crate::detection::{bbox_center, Alert, Detection, NodeData, TrafficStats};
use crate::error::Result;
use crate::nodes::SharedTools;
use crate::pipeline::model::NodeSpec;

const POSITION_WINDOW: usize = 10;
const DIRECTION_DOT_THRESHOLD: f64 = 0.5;
/// Crossing history is forgotten after this many seconds without updates.
const HISTORY_MAX_AGE: f64 = 60.0;

struct CrossingEntry {
    positions: VecDeque<[f64; 2]>,
    crossed: bool,
    last_update: f64,
}

pub struct DirectionFilterNode {
    node_id: String,
    line: Option<[[f64; 2]; 2]>,
    allowed: [f64; 2],
    crossing_history: HashMap<u64, CrossingEntry>,
    traffic: TrafficStats,
}

impl DirectionFilterNode {
    pub fn new(spec: &NodeSpec) -> Self {
        let line = spec
            .config_points("line")
            .filter(|pts| pts.len() == 2)
            .map(|pts| [pts[0], pts[1]]);
        let allowed = spec
            .config_points("direction")
            .and_then(|p| p.first().copied())
            .or_else(|| {
                // `direction` may arrive as a flat [dx, dy] pair.
                let flat = spec.data.get("direction")?.as_array()?;
                Some([flat.first()?.as_f64()?, flat.get(1)?.as_f64()?])
            })
            .unwrap_or([1.0, 0.0]);
        DirectionFilterNode {
            node_id: spec.id.clone(),
            line,
            allowed,
            crossing_history: HashMap::new(),
            traffic: TrafficStats::default(),
        }
    }

    pub fn execute(
        &mut self,
        _frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let detections = input.detections();
        let Some([line_a, line_b]) = self.line else {
            return Ok(NodeData::with_detections(detections.to_vec()));
        };
        if detections.is_empty() {
            return Ok(NodeData::with_detections(Vec::new()));
        }

        let now = tools.frame_meta.timestamp;
        let allowed = normalize(&self.allowed);
        let mut kept: Vec<Detection> = Vec::new();
        let mut wrong_way: Vec<Detection> = Vec::new();

        for det in detections {
            let mut det = det.clone();
            let Some(track_id) = det.track_id else {
                // Untracked objects cannot cross anything; pass through.
                kept.push(det);
                continue;
            };

            let position = bbox_center(&det.bbox);
            let entry = self.crossing_history.entry(track_id).or_insert(CrossingEntry {
                positions: VecDeque::new(),
                crossed: false,
                last_update: now,
            });
            entry.last_update = now;
            if entry.positions.len() == POSITION_WINDOW {
                entry.positions.pop_front();
            }
            entry.positions.push_back(position);

            if entry.crossed || entry.positions.len() < 2 {
                kept.push(det);
                continue;
            }

            let prev = entry.positions[entry.positions.len() - 2];
            let Some(movement) = crossing_vector(&prev, &position, &line_a, &line_b) else {
                kept.push(det);
                continue;
            };

            entry.crossed = true;
            let dot = movement[0] * allowed[0] + movement[1] * allowed[1];
            let correct = dot > DIRECTION_DOT_THRESHOLD;

            det.line_crossed = Some(true);
            det.crossing_direction = Some(movement);
            det.correct_direction = Some(correct);

            self.traffic.total_crossings += 1;
            if correct {
                self.traffic.correct_direction += 1;
                debug!(node = self.node_id, track = track_id, "Correct-direction crossing");
                kept.push(det);
            } else {
                self.traffic.wrong_direction += 1;
                det.violation_type = Some("wrong_direction".into());
                det.alert_level = Some("high".into());
                warn!(node = self.node_id, track = track_id, "Wrong-way crossing detected");
                wrong_way.push(det);
            }
        }

        self.crossing_history.retain(|_, e| now - e.last_update <= HISTORY_MAX_AGE);

        self.traffic.wrong_way_ratio =
            self.traffic.wrong_direction as f64 / (self.traffic.total_crossings.max(1)) as f64 * 100.0;
        tools.traffic_analytics.insert(self.node_id.clone(), self.traffic.clone());

        let mut out = NodeData::with_detections(kept);
        if !wrong_way.is_empty() {
            out.alerts = Some(vec![Alert {
                kind: "wrong_way_violation".into(),
                count: wrong_way.len(),
                severity: "high".into(),
                timestamp: now,
            }]);
            out.wrong_way_detections = Some(wrong_way);
        }
        Ok(out)
    }
}

/// Unit movement vector if the step `prev → curr` crosses segment `a-b`.
fn crossing_vector(
    prev: &[f64; 2],
    curr: &[f64; 2],
    a: &[f64; 2],
    b: &[f64; 2],
) -> Option<[f64; 2]> {
    if !segments_intersect(prev, curr, a, b) {
        return None;
    }
    let movement = [curr[0] - prev[0], curr[1] - prev[1]];
    let norm = (movement[0].powi(2) + movement[1].powi(2)).sqrt();
    if norm == 0.0 {
        return None;
    }
    Some([movement[0] / norm, movement[1] / norm])
}

fn ccw(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2]) -> bool {
    (c[1] - a[1]) * (b[0] - a[0]) > (b[1] - a[1]) * (c[0] - a[0])
}

fn segments_intersect(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2], d: &[f64; 2]) -> bool {
    ccw(a, c, d) != ccw(b, c, d) && ccw(a, b, c) != ccw(a, b, d)
}

fn normalize(v: &[f64; 2]) -> [f64; 2] {
    let norm = (v[0].powi(2) + v[1].powi(2)).sqrt();
    if norm > 0.0 {
        [v[0] / norm, v[1] / norm]
    } else {
        [1.0, 0.0]
    }
}
