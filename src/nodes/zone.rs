// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! polygonFilter — keeps detections whose ground point lies inside a zone
//! and tracks enter / dwell / exit transitions per object.
//!
//! The reference point is the bottom-centre of the bounding box. Point-in-
//! polygon uses the ray-casting rule with the boundary counted as inside.

use std::collections::HashMap;

use image::RgbImage;
use tracing::{debug, info};

use crate::detection::{bbox_bottom_center, Detection, NodeData, ZoneStats};
use crate::error::Result;
use crate::nodes::SharedTools;
use crate::pipeline::model::NodeSpec;

/// Zone history is forgotten after this many seconds without updates.
const HISTORY_MAX_AGE: f64 = 300.0;

struct ZoneEntry {
    last_seen: f64,
    was_inside: bool,
    entry_time: Option<f64>,
}

pub struct PolygonFilterNode {
    node_id: String,
    polygon: Vec<[f64; 2]>,
    zone_history: HashMap<String, ZoneEntry>,
}

impl PolygonFilterNode {
    pub fn new(spec: &NodeSpec) -> Self {
        PolygonFilterNode {
            node_id: spec.id.clone(),
            polygon: spec.config_points("polygon").unwrap_or_default(),
            zone_history: HashMap::new(),
        }
    }

    pub fn execute(
        &mut self,
        _frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let detections = input.detections();
        if self.polygon.len() < 3 || detections.is_empty() {
            return Ok(NodeData::with_detections(Vec::new()));
        }

        let now = tools.frame_meta.timestamp;
        let mut stats = ZoneStats::default();
        let mut kept: Vec<Detection> = Vec::new();

        for det in detections {
            let mut det = det.clone();
            let point = bbox_bottom_center(&det.bbox);
            let inside = point_in_polygon(&point, &self.polygon);

            let key = track_key(&det);
            let entry = self.zone_history.entry(key.clone()).or_insert(ZoneEntry {
                last_seen: now,
                was_inside: false,
                entry_time: None,
            });
            entry.last_seen = now;

            match (entry.was_inside, inside) {
                (false, true) => {
                    entry.was_inside = true;
                    entry.entry_time = Some(now);
                    stats.new_entries += 1;
                    det.zone_event = Some("enter".into());
                    info!(node = self.node_id, object = %key, "Object entered zone");
                }
                (true, false) => {
                    if let Some(t0) = entry.entry_time.take() {
                        det.zone_dwell_time = Some(now - t0);
                    }
                    entry.was_inside = false;
                    stats.exits += 1;
                    det.zone_event = Some("exit".into());
                    info!(node = self.node_id, object = %key, "Object exited zone");
                }
                (true, true) => {
                    if let Some(t0) = entry.entry_time {
                        det.zone_dwell_time = Some(now - t0);
                    }
                    det.zone_event = Some("dwell".into());
                }
                (false, false) => {}
            }

            if inside {
                stats.objects_in_zone += 1;
                kept.push(det);
            }
        }

        let area = polygon_area(&self.polygon);
        if area > 0.0 {
            stats.zone_density = stats.objects_in_zone as f64 / (area / 1000.0);
        }

        self.zone_history.retain(|_, e| now - e.last_seen <= HISTORY_MAX_AGE);
        debug!(
            node = self.node_id,
            in_zone = stats.objects_in_zone,
            entries = stats.new_entries,
            exits = stats.exits,
            "Zone pass"
        );
        tools.zone_analytics.insert(self.node_id.clone(), stats);

        Ok(NodeData::with_detections(kept))
    }
}

fn track_key(det: &Detection) -> String {
    match det.track_id {
        Some(id) => format!("track_{id}"),
        None => format!(
            "anon_{:.0}_{:.0}_{:.0}_{:.0}",
            det.bbox[0], det.bbox[1], det.bbox[2], det.bbox[3]
        ),
    }
}

/// Ray casting with boundary-inclusive edges.
pub fn point_in_polygon(point: &[f64; 2], polygon: &[[f64; 2]]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    for i in 0..n {
        if on_segment(point, &polygon[i], &polygon[(i + 1) % n]) {
            return true;
        }
    }

    let (x, y) = (point[0], point[1]);
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (polygon[i][0], polygon[i][1]);
        let (xj, yj) = (polygon[j][0], polygon[j][1]);
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: &[f64; 2], a: &[f64; 2], b: &[f64; 2]) -> bool {
    const EPS: f64 = 1e-9;
    let cross = (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0]);
    if cross.abs() > EPS {
        return false;
    }
    p[0] >= a[0].min(b[0]) - EPS
        && p[0] <= a[0].max(b[0]) + EPS
        && p[1] >= a[1].min(b[1]) - EPS
        && p[1] <= a[1].max(b[1]) + EPS
}

/// Shoelace area.
fn polygon_area(polygon: &[[f64; 2]]) -> f64 {
    let n = polygon.len();
    let mut acc = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        acc += polygon[i][0] * polygon[j][1] - polygon[j][0] * polygon[i][1];
    }
    acc.abs() / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::ToolHarness;
    use serde_json::json;

    fn square_node() -> PolygonFilterNode {
        PolygonFilterNode::new(&NodeSpec {
            id: "zone-1".into(),
            node_type: "polygonFilter".into(),
            data: json!({"polygon": [[0, 0], [100, 0], [100, 100], [0, 100]]}),
        })
    }

    fn det_at(cx: f64, bottom: f64, id: u64) -> crate::detection::Detection {
        let mut d = crate::detection::Detection::new(
            [cx - 10.0, bottom - 40.0, cx + 10.0, bottom],
            0.9,
            "person",
            0,
        );
        d.track_id = Some(id);
        d
    }

    #[test]
    fn inside_outside_and_boundary() {
        let square = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]];
        assert!(point_in_polygon(&[50.0, 50.0], &square));
        assert!(!point_in_polygon(&[150.0, 50.0], &square));
        assert!(point_in_polygon(&[100.0, 50.0], &square), "boundary counts as inside");
        assert!(point_in_polygon(&[0.0, 0.0], &square), "vertex counts as inside");
    }

    #[test]
    fn decision_is_deterministic_regardless_of_history() {
        let square = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]];
        let p = [30.0, 70.0];
        let first = point_in_polygon(&p, &square);
        for _ in 0..10 {
            assert_eq!(point_in_polygon(&p, &square), first);
        }
    }

    #[test]
    fn reference_point_is_bottom_center() {
        let mut harness = ToolHarness::new();
        let mut node = square_node();
        // Box centre inside, but bottom-centre (50, 120) below the zone.
        let det = det_at(50.0, 120.0, 1);
        let frame = image::RgbImage::new(640, 480);
        let out = harness
            .run(|tools| node.execute(&frame, &NodeData::with_detections(vec![det]), tools))
            .unwrap();
        assert!(out.detections().is_empty());
    }

    #[test]
    fn enter_dwell_exit_lifecycle() {
        let mut harness = ToolHarness::new();
        let mut node = square_node();
        let frame = image::RgbImage::new(640, 480);

        // Enter.
        harness.meta.timestamp = 10.0;
        let out = harness
            .run(|tools| {
                node.execute(&frame, &NodeData::with_detections(vec![det_at(50.0, 50.0, 7)]), tools)
            })
            .unwrap();
        assert_eq!(out.detections()[0].zone_event.as_deref(), Some("enter"));

        // Dwell with measured time.
        harness.meta.timestamp = 14.0;
        let out = harness
            .run(|tools| {
                node.execute(&frame, &NodeData::with_detections(vec![det_at(55.0, 55.0, 7)]), tools)
            })
            .unwrap();
        let det = &out.detections()[0];
        assert_eq!(det.zone_event.as_deref(), Some("dwell"));
        assert!((det.zone_dwell_time.unwrap() - 4.0).abs() < 1e-9);

        // Exit: detection filtered out, counters updated.
        harness.meta.timestamp = 16.0;
        let out = harness
            .run(|tools| {
                node.execute(&frame, &NodeData::with_detections(vec![det_at(300.0, 300.0, 7)]), tools)
            })
            .unwrap();
        assert!(out.detections().is_empty());
        let stats = &harness.zone_analytics["zone-1"];
        assert_eq!(stats.exits, 1);
        assert_eq!(stats.objects_in_zone, 0);
    }

    #[test]
    fn density_counts_objects_per_kilo_pixel() {
        let mut harness = ToolHarness::new();
        let mut node = square_node();
        let frame = image::RgbImage::new(640, 480);
        let dets = vec![det_at(20.0, 20.0, 1), det_at(80.0, 80.0, 2)];
        harness
            .run(|tools| node.execute(&frame, &NodeData::with_detections(dets), tools))
            .unwrap();
        let stats = &harness.zone_analytics["zone-1"];
        assert_eq!(stats.objects_in_zone, 2);
        // Area 10_000 px² → density = 2 / 10 = 0.2.
        assert!((stats.zone_density - 0.2).abs() < 1e-9);
    }
}
