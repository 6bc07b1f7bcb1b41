// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Advanced multi-object tracker: Kalman prediction + appearance Re-ID.
//!
//! Association per frame: predict every track, score detection/track pairs
//! with `0.7·IoU + 0.3·cosine`, assign greedily (argmax, cross out row and
//! column), keep pairs scoring above 0.3. Unmatched detections seed tracks;
//! tracks unseen for more than `max_age` frames are deleted and their ids
//! never reused.

use std::collections::HashMap;

use serde_json::Value;

use crate::detection::{bbox_center, BBox, Detection};
use crate::error::{ArgusError, Result};
use crate::track::appearance::{cosine_similarity, AppearanceEncoder, AppearanceMemory};
use crate::track::kalman::{BehaviourState, KalmanBoxFilter};
use crate::track::TrackerConfig;

const COMBINED_SCORE_THRESHOLD: f64 = 0.3;
const IOU_WEIGHT: f64 = 0.7;
const SIMILARITY_WEIGHT: f64 = 0.3;

/// One persistent identity.
struct Track {
    id: u64,
    filter: KalmanBoxFilter,
    appearance: AppearanceMemory,
    behaviour: BehaviourState,
    hits: u64,
    hit_streak: u64,
    age: u32,
    time_since_update: u32,
    predicted: BBox,
}

impl Track {
    fn new(id: u64, bbox: &BBox, feature: Option<Vec<f32>>, now: f64) -> Self {
        let mut appearance = AppearanceMemory::default();
        if let Some(f) = feature {
            appearance.push(f);
        }
        let mut behaviour = BehaviourState::default();
        behaviour.record(bbox_center(bbox), now);
        Track {
            id,
            filter: KalmanBoxFilter::new(bbox),
            appearance,
            behaviour,
            hits: 1,
            hit_streak: 1,
            age: 0,
            time_since_update: 0,
            predicted: *bbox,
        }
    }

    fn predict(&mut self) {
        self.predicted = self.filter.predict();
        self.age += 1;
        if self.time_since_update > 0 {
            self.hit_streak = 0;
        }
        self.time_since_update += 1;
    }

    fn update(&mut self, bbox: &BBox, feature: Option<Vec<f32>>, now: f64) -> Result<()> {
        self.time_since_update = 0;
        self.hits += 1;
        self.hit_streak += 1;
        self.filter.update(bbox)?;
        if let Some(f) = feature {
            self.appearance.push(f);
        }
        self.behaviour.record(bbox_center(bbox), now);
        Ok(())
    }

    /// Reportable this frame: just updated, and either past the hit-streak
    /// gate or still in its never-missed early life.
    fn reportable(&self, min_hits: u32) -> bool {
        self.time_since_update == 0 && (self.hit_streak >= min_hits as u64 || self.hit_streak == self.hits)
    }
}

/// Loitering details for one track.
#[derive(Debug, Clone)]
pub struct LoiteringInfo {
    pub duration: f64,
    pub bbox: BBox,
    pub confidence: &'static str,
    pub hits: u64,
}

/// Behavioural snapshot used to decorate detections.
#[derive(Debug, Clone)]
pub struct TrackView {
    pub id: u64,
    pub bbox: BBox,
    pub age: u32,
    pub speed: f64,
    pub direction: f64,
    pub trajectory_length: usize,
    pub movement_pattern: &'static str,
    pub trajectory_analysis: Option<Value>,
}

pub struct AdvancedTracker {
    tracks: Vec<Track>,
    next_id: u64,
    max_age: u32,
    min_hits: u32,
    encoder: AppearanceEncoder,
}

impl AdvancedTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        let encoder = match &config.models_path {
            Some(path) => AppearanceEncoder::load(path),
            None => AppearanceEncoder::projection_only(),
        };
        AdvancedTracker {
            tracks: Vec::new(),
            next_id: 0,
            max_age: config.max_age,
            min_hits: config.min_hits,
            encoder,
        }
    }

    /// One tracking step. Errors (bad boxes, singular covariance) bubble up
    /// so the hybrid wrapper can demote to the centroid back-end.
    pub fn update(
        &mut self,
        detections: &[Detection],
        frame: Option<&image::RgbImage>,
        now: f64,
    ) -> Result<HashMap<u64, BBox>> {
        validate_boxes(detections)?;

        for track in &mut self.tracks {
            track.predict();
        }

        let features: Option<Vec<Vec<f32>>> = frame.map(|f| {
            detections.iter().map(|d| self.encoder.encode(f, &d.bbox)).collect()
        });

        let (matched, unmatched_dets) = self.associate(detections, features.as_deref());

        for (det_idx, trk_idx) in matched {
            let feature = features.as_ref().map(|f| f[det_idx].clone());
            self.tracks[trk_idx].update(&detections[det_idx].bbox, feature, now)?;
        }

        for det_idx in unmatched_dets {
            let feature = features.as_ref().map(|f| f[det_idx].clone());
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(Track::new(id, &detections[det_idx].bbox, feature, now));
        }

        let max_age = self.max_age;
        self.tracks.retain(|t| t.time_since_update <= max_age);

        let mut results = HashMap::new();
        for track in &self.tracks {
            if track.reportable(self.min_hits) {
                results.insert(track.id, track.filter.bbox());
            }
        }
        Ok(results)
    }

    /// Greedy association on the combined IoU + appearance score.
    /// Returns matched `(det_idx, trk_idx)` pairs and unmatched detections.
    fn associate(
        &self,
        detections: &[Detection],
        features: Option<&[Vec<f32>]>,
    ) -> (Vec<(usize, usize)>, Vec<usize>) {
        let n_det = detections.len();
        let n_trk = self.tracks.len();
        if n_trk == 0 {
            return (Vec::new(), (0..n_det).collect());
        }
        if n_det == 0 {
            return (Vec::new(), Vec::new());
        }

        let track_features: Vec<Option<Vec<f32>>> =
            self.tracks.iter().map(|t| t.appearance.mean()).collect();

        let mut score = vec![vec![0.0f64; n_trk]; n_det];
        for (d, det) in detections.iter().enumerate() {
            for (t, track) in self.tracks.iter().enumerate() {
                let iou = iou(&det.bbox, &track.predicted);
                let sim = match (features.and_then(|f| f.get(d)), &track_features[t]) {
                    (Some(df), Some(tf)) => cosine_similarity(df, tf),
                    _ => 0.0,
                };
                score[d][t] = IOU_WEIGHT * iou + SIMILARITY_WEIGHT * sim;
            }
        }

        let mut used_det = vec![false; n_det];
        let mut used_trk = vec![false; n_trk];
        let mut pairs = Vec::new();
        for _ in 0..n_det.min(n_trk) {
            let mut best = (0usize, 0usize, f64::NEG_INFINITY);
            for d in 0..n_det {
                if used_det[d] {
                    continue;
                }
                for t in 0..n_trk {
                    if used_trk[t] {
                        continue;
                    }
                    if score[d][t] > best.2 {
                        best = (d, t, score[d][t]);
                    }
                }
            }
            let (d, t, s) = best;
            if s == f64::NEG_INFINITY {
                break;
            }
            used_det[d] = true;
            used_trk[t] = true;
            pairs.push((d, t, s));
        }

        let mut matched = Vec::new();
        let mut unmatched: Vec<usize> = Vec::new();
        for (d, t, s) in pairs {
            if s > COMBINED_SCORE_THRESHOLD {
                matched.push((d, t));
            } else {
                unmatched.push(d);
            }
        }
        for d in 0..n_det {
            if !used_det[d] {
                unmatched.push(d);
            }
        }
        (matched, unmatched)
    }

    pub fn loitering_ids(&self, threshold: f64, now: f64) -> Vec<u64> {
        self.tracks
            .iter()
            .filter(|t| t.time_since_update < 1 && t.behaviour.is_loitering(threshold, now))
            .map(|t| t.id)
            .collect()
    }

    pub fn detailed_loitering(&self, threshold: f64, now: f64) -> HashMap<u64, LoiteringInfo> {
        let mut out = HashMap::new();
        for track in &self.tracks {
            if track.time_since_update < 1 && track.behaviour.is_loitering(threshold, now) {
                let duration = track.behaviour.loitering_duration(now);
                out.insert(
                    track.id,
                    LoiteringInfo {
                        duration,
                        bbox: track.filter.bbox(),
                        confidence: if duration > threshold * 1.5 { "HIGH" } else { "MEDIUM" },
                        hits: track.hits,
                    },
                );
            }
        }
        out
    }

    pub fn track_views(&self) -> Vec<TrackView> {
        self.tracks
            .iter()
            .filter(|t| t.time_since_update == 0)
            .map(|t| TrackView {
                id: t.id,
                bbox: t.filter.bbox(),
                age: t.age,
                speed: t.behaviour.speed,
                direction: t.behaviour.direction,
                trajectory_length: t.behaviour.trajectory_len(),
                movement_pattern: t.behaviour.movement_pattern(),
                trajectory_analysis: t.behaviour.trajectory_summary(),
            })
            .collect()
    }
}

fn validate_boxes(detections: &[Detection]) -> Result<()> {
    for det in detections {
        let b = &det.bbox;
        if b.iter().any(|v| !v.is_finite()) || b[2] <= b[0] || b[3] <= b[1] {
            return Err(ArgusError::Tracker(format!("invalid detection box {b:?}")));
        }
    }
    Ok(())
}

/// Standard axis-aligned intersection over union.
pub fn iou(a: &BBox, b: &BBox) -> f64 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: BBox) -> Detection {
        Detection::new(bbox, 0.9, "person", 0)
    }

    fn tracker() -> AdvancedTracker {
        AdvancedTracker::new(&TrackerConfig::default())
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [10.0, 10.0, 50.0, 80.0];
        assert!((iou(&b, &b) - 1.0).abs() < 1e-12);
        assert_eq!(iou(&b, &[100.0, 100.0, 120.0, 130.0]), 0.0);
    }

    #[test]
    fn identity_is_kept_across_frames() {
        let mut t = tracker();
        let first = t.update(&[det([10.0, 10.0, 50.0, 90.0])], None, 0.0).unwrap();
        assert_eq!(first.len(), 1);
        let id = *first.keys().next().unwrap();

        // Small motion, same object.
        let second = t.update(&[det([14.0, 10.0, 54.0, 90.0])], None, 0.5).unwrap();
        assert_eq!(second.len(), 1);
        assert!(second.contains_key(&id), "same object keeps its id");
    }

    #[test]
    fn two_objects_keep_their_own_ids() {
        let mut t = tracker();
        let a0 = [0.0, 0.0, 40.0, 80.0];
        let b0 = [300.0, 0.0, 340.0, 80.0];
        let r0 = t.update(&[det(a0), det(b0)], None, 0.0).unwrap();
        let id_a = *r0.iter().find(|(_, b)| b[0] < 100.0).unwrap().0;
        let id_b = *r0.iter().find(|(_, b)| b[0] > 100.0).unwrap().0;

        let r1 = t
            .update(&[det([5.0, 0.0, 45.0, 80.0]), det([305.0, 0.0, 345.0, 80.0])], None, 0.5)
            .unwrap();
        assert!(r1[&id_a][0] < 100.0);
        assert!(r1[&id_b][0] > 100.0);
    }

    #[test]
    fn stale_tracks_are_deleted_and_ids_never_reused() {
        let config = TrackerConfig { max_age: 3, ..Default::default() };
        let mut t = AdvancedTracker::new(&config);
        let r = t.update(&[det([0.0, 0.0, 40.0, 80.0])], None, 0.0).unwrap();
        let old_id = *r.keys().next().unwrap();

        for i in 0..5 {
            t.update(&[], None, i as f64).unwrap();
        }
        assert!(t.tracks.is_empty(), "track expired after max_age misses");

        let r2 = t.update(&[det([0.0, 0.0, 40.0, 80.0])], None, 10.0).unwrap();
        let new_id = *r2.keys().next().unwrap();
        assert_ne!(new_id, old_id, "ids are never reused");
    }

    #[test]
    fn reacquired_track_waits_for_hit_streak() {
        let mut t = tracker();
        let b = [0.0, 0.0, 40.0, 80.0];
        let id = *t.update(&[det(b)], None, 0.0).unwrap().keys().next().unwrap();
        // Miss one frame, then reappear: the re-acquisition is suppressed
        // until the streak rebuilds.
        t.update(&[], None, 1.0).unwrap();
        let r = t.update(&[det(b)], None, 2.0).unwrap();
        assert!(!r.contains_key(&id));
        t.update(&[det(b)], None, 3.0).unwrap();
        let r = t.update(&[det(b)], None, 4.0).unwrap();
        assert!(r.contains_key(&id), "streak of 3 restores reporting");
    }

    #[test]
    fn non_finite_box_is_an_error() {
        let mut t = tracker();
        assert!(t.update(&[det([f64::NAN, 0.0, 10.0, 10.0])], None, 0.0).is_err());
        assert!(t.update(&[det([50.0, 0.0, 10.0, 10.0])], None, 0.0).is_err());
    }

    #[test]
    fn loitering_reported_with_detailed_info() {
        let mut t = tracker();
        let b = [100.0, 100.0, 140.0, 180.0];
        // One update per second; stationary object.
        let mut now = 0.0;
        for i in 0..30 {
            now = i as f64;
            t.update(&[det(b)], None, now).unwrap();
        }
        let ids = t.loitering_ids(10.0, now);
        assert_eq!(ids.len(), 1);
        let info = t.detailed_loitering(10.0, now);
        let entry = &info[&ids[0]];
        assert!(entry.duration > 10.0);
        assert_eq!(entry.confidence, "HIGH");
    }
}
