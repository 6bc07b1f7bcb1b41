// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! objectDetection — runs a detection model and optionally feeds the tracker.

use image::RgbImage;
use tracing::debug;

use crate::detection::{bbox_center, point_distance, Detection, NodeData};
use crate::error::Result;
use crate::models::DEFAULT_MODEL;
use crate::nodes::SharedTools;
use crate::pipeline::model::NodeSpec;

/// Radius (px) within which a detection centre adopts a track.
const TRACK_MATCH_RADIUS: f64 = 50.0;

pub struct DetectionNode {
    node_id: String,
    model_filename: String,
    classes: Option<Vec<String>>,
    confidence: f64,
    enable_tracking: bool,
}

impl DetectionNode {
    pub fn new(spec: &NodeSpec) -> Self {
        DetectionNode {
            node_id: spec.id.clone(),
            model_filename: spec
                .config_str("model_filename")
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            classes: spec.config_string_list("classes"),
            confidence: spec.config_f64("confidence", 0.5),
            enable_tracking: spec.config_bool("enable_tracking", true),
        }
    }

    pub fn execute(
        &mut self,
        frame: &RgbImage,
        _input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let detector = tools.models.get(&self.model_filename);
        let mut detections = detector.detect(frame);

        if let Some(classes) = &self.classes {
            detections.retain(|d| classes.contains(&d.class_name));
        }
        detections.retain(|d| d.confidence >= self.confidence);

        if self.enable_tracking {
            let tracked = tools
                .tracker
                .update(&detections, Some(frame), tools.frame_meta.timestamp);
            let views = tools.tracker.track_views();

            for det in &mut detections {
                let center = det.center();
                let adopted = tracked
                    .iter()
                    .find(|(_, bbox)| point_distance(&center, &bbox_center(bbox)) < TRACK_MATCH_RADIUS);
                let Some((id, _)) = adopted else { continue };
                det.track_id = Some(*id);

                if let Some(view) = views.iter().find(|v| v.id == *id) {
                    det.speed = Some(view.speed);
                    det.direction = Some(view.direction);
                    det.trajectory_length = Some(view.trajectory_length);
                    det.movement_pattern = Some(view.movement_pattern.to_string());
                    det.trajectory_analysis = view.trajectory_analysis.clone();
                }
            }
        }

        debug!(node = self.node_id, count = detections.len(), "Detections after filtering");
        Ok(NodeData::with_detections(detections))
    }
}
