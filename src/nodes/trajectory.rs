// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! trajectoryAnalysis — path metrics, prediction, abnormal behaviour and
//! crowd flow.
//!
//! Per tracked object a rolling history (≤50 positions, ≤300 s) feeds the
//! metrics; detections are annotated once `min_trajectory_length` points
//! exist. With two or more detections in frame a crowd summary is published.

use std::collections::HashMap;

use image::RgbImage;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::detection::{bbox_center, CrowdSummary, Detection, NodeData};
use crate::error::Result;
use crate::nodes::SharedTools;
use crate::pipeline::model::NodeSpec;

const MAX_POINTS: usize = 50;
const HISTORY_MAX_AGE: f64 = 300.0;
/// Radius (px) of a dwell cluster around its running centroid.
const DWELL_RADIUS: f64 = 30.0;
/// Minimum consecutive points for a dwell area.
const DWELL_MIN_POINTS: usize = 5;
const DIRECTION_CHANGE_DEG: f64 = 45.0;

#[derive(Debug, Clone, Serialize)]
pub struct TrajectoryMetrics {
    pub total_distance: f64,
    pub straight_distance: f64,
    pub sinuosity: f64,
    pub average_speed: f64,
    pub speed_variance: f64,
    pub max_speed: f64,
    pub min_speed: f64,
    pub direction_changes: usize,
    pub trajectory_duration: f64,
    pub smoothness: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DwellArea {
    pub position: [f64; 2],
    pub duration: f64,
    pub start_time: f64,
    pub end_time: f64,
}

struct TrackTrajectory {
    positions: Vec<[f64; 2]>,
    timestamps: Vec<f64>,
    last_update: f64,
}

pub struct TrajectoryNode {
    node_id: String,
    min_length: usize,
    speed_threshold: f64,
    prediction_frames: f64,
    enable_crowd: bool,
    cache: HashMap<u64, TrackTrajectory>,
}

impl TrajectoryNode {
    pub fn new(spec: &NodeSpec) -> Self {
        TrajectoryNode {
            node_id: spec.id.clone(),
            min_length: spec.config_u64("min_trajectory_length", 5) as usize,
            speed_threshold: spec.config_f64("abnormal_speed_threshold", 50.0),
            prediction_frames: spec.config_f64("prediction_frames", 10.0),
            enable_crowd: spec.config_bool("enable_crowd_analysis", true),
            cache: HashMap::new(),
        }
    }

    pub fn execute(
        &mut self,
        _frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let detections = input.detections();
        if detections.is_empty() {
            return Ok(NodeData::with_detections(Vec::new()));
        }

        let now = tools.frame_meta.timestamp;
        let mut enhanced: Vec<Detection> = Vec::new();

        for det in detections {
            let mut det = det.clone();
            let Some(track_id) = det.track_id else {
                enhanced.push(det);
                continue;
            };

            let entry = self.cache.entry(track_id).or_insert(TrackTrajectory {
                positions: Vec::new(),
                timestamps: Vec::new(),
                last_update: now,
            });
            entry.positions.push(bbox_center(&det.bbox));
            entry.timestamps.push(now);
            entry.last_update = now;
            // Bound the history by count and by age.
            let mut cut = entry.positions.len().saturating_sub(MAX_POINTS);
            while cut < entry.timestamps.len() && now - entry.timestamps[cut] > HISTORY_MAX_AGE {
                cut += 1;
            }
            if cut > 0 {
                entry.positions.drain(..cut);
                entry.timestamps.drain(..cut);
            }

            if entry.positions.len() >= self.min_length {
                if let Some(metrics) = analyze(&entry.positions, &entry.timestamps) {
                    if let Some(abnormal) = abnormal_patterns(&metrics, self.speed_threshold) {
                        warn!(
                            node = self.node_id,
                            track = track_id,
                            patterns = ?abnormal,
                            "Abnormal behaviour detected"
                        );
                        det.abnormal_behavior = Some(abnormal);
                        det.alert_level = Some("medium".into());
                    }

                    det.trajectory_analysis = Some(json!({
                        "total_distance": metrics.total_distance,
                        "straight_distance": metrics.straight_distance,
                        "sinuosity": metrics.sinuosity,
                        "average_speed": metrics.average_speed,
                        "speed_variance": metrics.speed_variance,
                        "max_speed": metrics.max_speed,
                        "min_speed": metrics.min_speed,
                        "direction_changes": metrics.direction_changes,
                        "trajectory_duration": metrics.trajectory_duration,
                        "smoothness": metrics.smoothness,
                    }));
                }
                if entry.positions.len() >= 3 {
                    det.predicted_position =
                        Some(predict(&entry.positions, self.prediction_frames));
                }

                det.path_complexity = Some(path_complexity(&entry.positions));

                if entry.positions.len() >= DWELL_MIN_POINTS {
                    let areas = dwell_areas(&entry.positions, &entry.timestamps);
                    let total_dwell: f64 = areas.iter().map(|a| a.duration).sum();
                    let max_dwell = areas.iter().map(|a| a.duration).fold(0.0, f64::max);
                    det.dwell_analysis = Some(json!({
                        "dwell_areas": areas,
                        "total_dwell_time": total_dwell,
                        "max_dwell_duration": max_dwell,
                    }));
                }
            }

            enhanced.push(det);
        }

        if self.enable_crowd && enhanced.len() > 1 {
            *tools.crowd_analysis = crowd_summary(&enhanced);
        }

        self.cache.retain(|_, t| now - t.last_update <= HISTORY_MAX_AGE);
        debug!(node = self.node_id, tracks = self.cache.len(), "Trajectory pass");

        Ok(NodeData::with_detections(enhanced))
    }
}

fn analyze(positions: &[[f64; 2]], timestamps: &[f64]) -> Option<TrajectoryMetrics> {
    if positions.len() < 2 {
        return None;
    }

    let mut speeds = Vec::with_capacity(positions.len() - 1);
    let mut directions = Vec::with_capacity(positions.len() - 1);
    let mut total = 0.0;
    for i in 1..positions.len() {
        let step = dist(&positions[i - 1], &positions[i]);
        total += step;
        let dt = (timestamps[i] - timestamps[i - 1]).max(0.001);
        speeds.push(step / dt);
        let dx = positions[i][0] - positions[i - 1][0];
        let dy = positions[i][1] - positions[i - 1][1];
        if dx != 0.0 || dy != 0.0 {
            directions.push(dy.atan2(dx).to_degrees());
        }
    }

    let straight = dist(&positions[0], &positions[positions.len() - 1]);
    let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
    let variance = speeds.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / speeds.len() as f64;

    Some(TrajectoryMetrics {
        total_distance: total,
        straight_distance: straight,
        sinuosity: total / straight.max(1.0),
        average_speed: mean,
        speed_variance: variance,
        max_speed: speeds.iter().cloned().fold(0.0, f64::max),
        min_speed: speeds.iter().cloned().fold(f64::INFINITY, f64::min),
        direction_changes: direction_changes(&directions),
        trajectory_duration: timestamps[timestamps.len() - 1] - timestamps[0],
        smoothness: 1.0 / variance.max(0.1),
    })
}

fn direction_changes(directions: &[f64]) -> usize {
    directions
        .windows(2)
        .filter(|w| {
            let mut delta = (w[1] - w[0]).abs();
            if delta > 180.0 {
                delta = 360.0 - delta;
            }
            delta > DIRECTION_CHANGE_DEG
        })
        .count()
}

fn abnormal_patterns(metrics: &TrajectoryMetrics, speed_threshold: f64) -> Option<Vec<String>> {
    let mut patterns = Vec::new();
    if metrics.max_speed > speed_threshold {
        patterns.push("excessive_speed".to_string());
    }
    if metrics.direction_changes > 10 {
        patterns.push("erratic_movement".to_string());
    }
    if metrics.smoothness < 0.3 {
        patterns.push("irregular_path".to_string());
    }
    if metrics.sinuosity > 3.0 {
        patterns.push("highly_winding_path".to_string());
    }
    if metrics.speed_variance > 100.0 {
        patterns.push("sudden_speed_changes".to_string());
    }
    if patterns.is_empty() {
        None
    } else {
        Some(patterns)
    }
}

/// Variance of the turn angles between consecutive path segments. A straight
/// line scores 0; the more the heading wobbles, the higher the score.
fn path_complexity(positions: &[[f64; 2]]) -> f64 {
    if positions.len() < 3 {
        return 0.0;
    }
    let mut angles = Vec::with_capacity(positions.len() - 2);
    for w in positions.windows(3) {
        let v1 = [w[1][0] - w[0][0], w[1][1] - w[0][1]];
        let v2 = [w[2][0] - w[1][0], w[2][1] - w[1][1]];
        let n1 = (v1[0].powi(2) + v1[1].powi(2)).sqrt();
        let n2 = (v2[0].powi(2) + v2[1].powi(2)).sqrt();
        if n1 > 0.0 && n2 > 0.0 {
            let cos = ((v1[0] * v2[0] + v1[1] * v2[1]) / (n1 * n2)).clamp(-1.0, 1.0);
            angles.push(cos.acos());
        }
    }
    if angles.is_empty() {
        return 0.0;
    }
    let mean = angles.iter().sum::<f64>() / angles.len() as f64;
    angles.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / angles.len() as f64
}

/// Linear extrapolation from the mean velocity of the last three points.
fn predict(positions: &[[f64; 2]], frames_ahead: f64) -> [f64; 2] {
    let n = positions.len();
    let recent = &positions[n - 3..];
    let mut vx = 0.0;
    let mut vy = 0.0;
    for w in recent.windows(2) {
        vx += w[1][0] - w[0][0];
        vy += w[1][1] - w[0][1];
    }
    vx /= 2.0;
    vy /= 2.0;
    [positions[n - 1][0] + vx * frames_ahead, positions[n - 1][1] + vy * frames_ahead]
}

/// Maximal runs of ≥5 consecutive points within 30 px of the running cluster
/// centroid.
fn dwell_areas(positions: &[[f64; 2]], timestamps: &[f64]) -> Vec<DwellArea> {
    if positions.len() < DWELL_MIN_POINTS {
        return Vec::new();
    }

    let mut areas = Vec::new();
    let mut cluster: Vec<usize> = Vec::new();

    let close = |cluster: &[usize], i: usize| {
        let cx = cluster.iter().map(|&j| positions[j][0]).sum::<f64>() / cluster.len() as f64;
        let cy = cluster.iter().map(|&j| positions[j][1]).sum::<f64>() / cluster.len() as f64;
        dist(&[cx, cy], &positions[i]) < DWELL_RADIUS
    };
    let flush = |cluster: &[usize], areas: &mut Vec<DwellArea>| {
        if cluster.len() < DWELL_MIN_POINTS {
            return;
        }
        let cx = cluster.iter().map(|&j| positions[j][0]).sum::<f64>() / cluster.len() as f64;
        let cy = cluster.iter().map(|&j| positions[j][1]).sum::<f64>() / cluster.len() as f64;
        let start = timestamps[cluster[0]];
        let end = timestamps[cluster[cluster.len() - 1]];
        areas.push(DwellArea { position: [cx, cy], duration: end - start, start_time: start, end_time: end });
    };

    for i in 0..positions.len() {
        if cluster.is_empty() || close(&cluster, i) {
            cluster.push(i);
        } else {
            flush(&cluster, &mut areas);
            cluster = vec![i];
        }
    }
    flush(&cluster, &mut areas);
    areas
}

fn crowd_summary(detections: &[Detection]) -> Option<CrowdSummary> {
    if detections.len() < 2 {
        return None;
    }

    let speeds: Vec<f64> = detections
        .iter()
        .filter_map(|d| {
            d.trajectory_analysis
                .as_ref()
                .and_then(|t| t.get("average_speed"))
                .and_then(serde_json::Value::as_f64)
        })
        .collect();
    let directions: Vec<f64> = detections.iter().filter_map(|d| d.direction).collect();
    let positions: Vec<[f64; 2]> = detections.iter().map(|d| bbox_center(&d.bbox)).collect();

    let avg_speed = if speeds.is_empty() {
        0.0
    } else {
        speeds.iter().sum::<f64>() / speeds.len() as f64
    };
    let speed_std = if speeds.is_empty() {
        0.0
    } else {
        (speeds.iter().map(|s| (s - avg_speed).powi(2)).sum::<f64>() / speeds.len() as f64).sqrt()
    };

    let dominant_direction = if directions.is_empty() {
        None
    } else {
        // Angle of the mean unit vector.
        let (sx, sy) = directions.iter().fold((0.0, 0.0), |(sx, sy), deg| {
            let rad = deg.to_radians();
            (sx + rad.cos(), sy + rad.sin())
        });
        let n = directions.len() as f64;
        Some((sy / n).atan2(sx / n).to_degrees())
    };

    let n = positions.len() as f64;
    let cx = positions.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = positions.iter().map(|p| p[1]).sum::<f64>() / n;
    let sx = (positions.iter().map(|p| (p[0] - cx).powi(2)).sum::<f64>() / n).sqrt();
    let sy = (positions.iter().map(|p| (p[1] - cy).powi(2)).sum::<f64>() / n).sqrt();

    Some(CrowdSummary {
        object_count: detections.len(),
        average_speed: avg_speed,
        speed_deviation: speed_std,
        dominant_direction,
        density_center: Some([cx, cy]),
        density_spread: Some([sx, sy]),
        crowd_coherence: 1.0 / speed_std.max(0.1),
    })
}

fn dist(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::ToolHarness;
    use serde_json::json;

    fn node(data: serde_json::Value) -> TrajectoryNode {
        TrajectoryNode::new(&NodeSpec {
            id: "traj-1".into(),
            node_type: "trajectoryAnalysis".into(),
            data,
        })
    }

    fn tracked_det(cx: f64, cy: f64, id: u64) -> Detection {
        let mut d = Detection::new([cx - 10.0, cy - 10.0, cx + 10.0, cy + 10.0], 0.9, "person", 0);
        d.track_id = Some(id);
        d
    }

    #[test]
    fn straight_path_metrics_are_sane() {
        let mut harness = ToolHarness::new();
        let mut n = node(json!({"min_trajectory_length": 5}));
        let frame = image::RgbImage::new(640, 480);

        let mut last = None;
        for i in 0..8 {
            harness.meta.timestamp = i as f64;
            let out = harness
                .run(|tools| {
                    n.execute(
                        &frame,
                        &NodeData::with_detections(vec![tracked_det(i as f64 * 10.0, 100.0, 1)]),
                        tools,
                    )
                })
                .unwrap();
            last = Some(out);
        }

        let out = last.unwrap();
        let det = &out.detections()[0];
        let analysis = det.trajectory_analysis.as_ref().unwrap();
        let sinuosity = analysis["sinuosity"].as_f64().unwrap();
        let smoothness = analysis["smoothness"].as_f64().unwrap();
        assert!(sinuosity >= 1.0 && sinuosity < 1.05, "straight path, got {sinuosity}");
        assert!(smoothness > 0.0);
        assert!((analysis["average_speed"].as_f64().unwrap() - 10.0).abs() < 1e-6);
        assert_eq!(analysis["direction_changes"].as_u64().unwrap(), 0);
        // A straight line has no turn-angle spread.
        assert!(det.path_complexity.unwrap().abs() < 1e-9);
        // Prediction continues the motion.
        let predicted = det.predicted_position.unwrap();
        assert!((predicted[0] - (70.0 + 10.0 * 10.0)).abs() < 1e-6);
        // Dwell aggregates are attached and consistent.
        let dwell = det.dwell_analysis.as_ref().unwrap();
        let total = dwell["total_dwell_time"].as_f64().unwrap();
        let max = dwell["max_dwell_duration"].as_f64().unwrap();
        assert!(total >= max);
        assert!(dwell["dwell_areas"].is_array());
    }

    #[test]
    fn path_complexity_separates_straight_from_wandering() {
        let straight: Vec<[f64; 2]> = (0..8).map(|i| [i as f64 * 10.0, 0.0]).collect();
        assert!(path_complexity(&straight).abs() < 1e-12);

        // Straight run, then a sharp corner: turn angles are a mix of 0 and
        // 90°, so their variance is positive.
        let corner = [
            [0.0, 0.0],
            [10.0, 0.0],
            [20.0, 0.0],
            [20.0, 10.0],
            [20.0, 20.0],
        ];
        assert!(path_complexity(&corner) > 0.0);
    }

    #[test]
    fn excessive_speed_is_flagged() {
        let mut harness = ToolHarness::new();
        let mut n = node(json!({"min_trajectory_length": 3, "abnormal_speed_threshold": 50.0}));
        let frame = image::RgbImage::new(4000, 480);

        let mut out = None;
        for i in 0..5 {
            harness.meta.timestamp = i as f64;
            out = Some(
                harness
                    .run(|tools| {
                        n.execute(
                            &frame,
                            &NodeData::with_detections(vec![tracked_det(i as f64 * 200.0, 100.0, 1)]),
                            tools,
                        )
                    })
                    .unwrap(),
            );
        }
        let det = &out.unwrap().detections()[0].clone();
        let abnormal = det.abnormal_behavior.as_ref().unwrap();
        assert!(abnormal.contains(&"excessive_speed".to_string()));
        assert_eq!(det.alert_level.as_deref(), Some("medium"));
    }

    #[test]
    fn dwell_area_found_for_stationary_run() {
        let positions: Vec<[f64; 2]> = (0..10)
            .map(|i| if i < 6 { [100.0, 100.0] } else { [400.0 + i as f64 * 50.0, 100.0] })
            .collect();
        let timestamps: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let areas = dwell_areas(&positions, &timestamps);
        assert_eq!(areas.len(), 1);
        assert!((areas[0].position[0] - 100.0).abs() < 1e-9);
        assert!((areas[0].duration - 5.0).abs() < 1e-9);
    }

    #[test]
    fn crowd_summary_present_with_two_objects() {
        let mut harness = ToolHarness::new();
        let mut n = node(json!({}));
        let frame = image::RgbImage::new(640, 480);

        for i in 0..6 {
            harness.meta.timestamp = i as f64;
            let mut a = tracked_det(100.0 + i as f64 * 5.0, 100.0, 1);
            a.direction = Some(0.0);
            let mut b = tracked_det(300.0 + i as f64 * 5.0, 300.0, 2);
            b.direction = Some(0.0);
            harness
                .run(|tools| n.execute(&frame, &NodeData::with_detections(vec![a.clone(), b.clone()]), tools))
                .unwrap();
        }

        let crowd = harness.crowd_analysis.as_ref().expect("crowd summary");
        assert_eq!(crowd.object_count, 2);
        assert!(crowd.dominant_direction.unwrap().abs() < 1e-6, "everyone heads right");
        assert!(crowd.crowd_coherence > 0.0);
    }
}
