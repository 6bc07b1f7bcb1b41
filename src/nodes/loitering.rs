// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! loiteringDetection — flags objects that stay put past a time threshold.
//!
//! With the advanced tracker a synthetic detection is built straight from
//! the track state. In fallback mode loitering ids are matched back to the
//! input detections by box similarity.

use image::RgbImage;
use tracing::{debug, info};

use crate::detection::{BBox, Detection, NodeData};
use crate::error::Result;
use crate::nodes::SharedTools;
use crate::pipeline::model::NodeSpec;

/// Mean absolute per-coordinate difference for fallback box matching.
const BOX_MATCH_TOLERANCE: f64 = 10.0;

pub struct LoiteringNode {
    node_id: String,
    time_threshold: f64,
}

impl LoiteringNode {
    pub fn new(spec: &NodeSpec) -> Self {
        LoiteringNode {
            node_id: spec.id.clone(),
            time_threshold: spec.config_f64("time_threshold", 10.0),
        }
    }

    pub fn execute(
        &mut self,
        frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let detections = input.detections();
        if detections.is_empty() {
            return Ok(NodeData::with_detections(Vec::new()));
        }

        let now = tools.frame_meta.timestamp;
        debug!(node = self.node_id, threshold = self.time_threshold, "Checking for loitering");

        let tracked = tools.tracker.update(detections, Some(frame), now);
        let detailed = tools.tracker.detailed_loitering(self.time_threshold, now);
        let loitering_ids = tools.tracker.loitering_ids(self.time_threshold, now);

        let mut loitering: Vec<Detection> = Vec::new();

        if !detailed.is_empty() {
            for id in &loitering_ids {
                let Some(info) = detailed.get(id) else { continue };
                let mut det = Detection::new(info.bbox, 0.9, "person", 0);
                det.loitering = Some(true);
                det.loitering_duration = Some(info.duration);
                det.loitering_confidence = Some(info.confidence.to_string());
                det.tracker_hits = Some(info.hits);
                det.object_id = Some(*id);
                det.detection_type = Some("advanced_loitering".into());
                loitering.push(det);
            }
        } else {
            for id in &loitering_ids {
                let Some(bbox) = tracked.get(id) else { continue };
                let Some(original) = detections.iter().find(|d| boxes_match(&d.bbox, bbox)) else {
                    continue;
                };
                let mut det = original.clone();
                det.loitering = Some(true);
                det.object_id = Some(*id);
                det.detection_type = Some("basic_loitering".into());
                loitering.push(det);
            }
        }

        if !loitering.is_empty() {
            let stats = tools.tracker.stats();
            info!(
                node = self.node_id,
                count = loitering.len(),
                mode = stats.current_mode,
                "Loitering objects detected"
            );
        }

        Ok(NodeData::with_detections(loitering))
    }
}

fn boxes_match(a: &BBox, b: &BBox) -> bool {
    let diff: f64 = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f64>() / 4.0;
    diff <= BOX_MATCH_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::ToolHarness;
    use serde_json::json;

    fn node(threshold: f64) -> LoiteringNode {
        LoiteringNode::new(&NodeSpec {
            id: "loiter-1".into(),
            node_type: "loiteringDetection".into(),
            data: json!({"time_threshold": threshold}),
        })
    }

    #[test]
    fn stationary_object_is_flagged_after_threshold() {
        let mut harness = ToolHarness::new();
        let mut n = node(10.0);
        let frame = image::RgbImage::new(320, 240);
        let det = Detection::new([100.0, 100.0, 130.0, 160.0], 0.9, "person", 0);

        // ~0.6 s per frame for 40 frames ≈ 24 s of standing still.
        let mut flagged = None;
        for i in 0..40 {
            harness.meta.timestamp = i as f64 * 0.6;
            let out = harness
                .run(|tools| n.execute(&frame, &NodeData::with_detections(vec![det.clone()]), tools))
                .unwrap();
            if !out.detections().is_empty() {
                flagged = Some(out);
                break;
            }
        }

        let out = flagged.expect("loitering reported once threshold passed");
        let dets = out.detections();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].loitering, Some(true));
        assert_eq!(dets[0].detection_type.as_deref(), Some("advanced_loitering"));
        assert!(dets[0].loitering_duration.unwrap() > 10.0);
        assert_eq!(harness.tracker.stats().current_mode, "advanced");
    }

    #[test]
    fn moving_object_is_not_flagged() {
        let mut harness = ToolHarness::new();
        let mut n = node(5.0);
        let frame = image::RgbImage::new(640, 240);

        for i in 0..30 {
            harness.meta.timestamp = i as f64;
            let x = i as f64 * 20.0;
            let det = Detection::new([x, 100.0, x + 30.0, 160.0], 0.9, "person", 0);
            let out = harness
                .run(|tools| n.execute(&frame, &NodeData::with_detections(vec![det]), tools))
                .unwrap();
            assert!(out.detections().is_empty(), "moving object flagged at frame {i}");
        }
    }

    #[test]
    fn fallback_mode_still_reports_loitering() {
        let mut harness = ToolHarness::new();
        let mut n = node(5.0);
        let frame = image::RgbImage::new(320, 240);

        // A non-finite box poisons the advanced back-end → permanent fallback.
        harness.meta.timestamp = 0.0;
        let poison = Detection::new([f64::NAN, 0.0, 10.0, 10.0], 0.9, "person", 0);
        harness
            .run(|tools| n.execute(&frame, &NodeData::with_detections(vec![poison]), tools))
            .unwrap();
        assert_eq!(harness.tracker.stats().current_mode, "fallback");
        assert_eq!(harness.tracker.stats().fallback_activations, 1);

        // Stationary object long enough for history to fill and the clock to pass.
        let det = Detection::new([100.0, 100.0, 130.0, 160.0], 0.9, "person", 0);
        let mut flagged = None;
        for i in 1..60 {
            harness.meta.timestamp = i as f64;
            let out = harness
                .run(|tools| n.execute(&frame, &NodeData::with_detections(vec![det.clone()]), tools))
                .unwrap();
            if !out.detections().is_empty() {
                flagged = Some(out);
                break;
            }
        }
        let out = flagged.expect("fallback loitering reported");
        assert_eq!(out.detections()[0].detection_type.as_deref(), Some("basic_loitering"));
        assert_eq!(harness.tracker.stats().current_mode, "fallback");
    }
}
