// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Multi-object tracking.
//!
//! Two back-ends behind one wrapper: the advanced tracker (Kalman prediction
//! + appearance Re-ID + greedy assignment) and a centroid nearest-neighbour
//! fallback. The wrapper starts advanced and demotes itself permanently for
//! the pipeline instance on the first advanced-side error.

pub mod advanced;
pub mod appearance;
pub mod centroid;
pub mod kalman;

use std::collections::HashMap;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::detection::{BBox, Detection};
use advanced::{AdvancedTracker, LoiteringInfo, TrackView};
use centroid::CentroidTracker;

/// Tunables shared by both back-ends.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Frames a track may go unmatched before deletion (advanced) or
    /// deregistration (centroid).
    pub max_age: u32,
    pub max_disappeared: u32,
    pub min_hits: u32,
    /// Seconds without significant movement before an object loiters.
    pub loitering_threshold: f64,
    /// Where to look for the Re-ID appearance model; `None` uses the
    /// deterministic projection features.
    pub models_path: Option<std::path::PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            max_age: 50,
            max_disappeared: 30,
            min_hits: 3,
            loitering_threshold: 15.0,
            models_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub total_updates: u64,
    pub advanced_tracker_errors: u64,
    pub fallback_activations: u64,
    pub current_mode: &'static str,
}

enum Backend {
    Advanced(AdvancedTracker),
    Fallback(CentroidTracker),
}

/// Hybrid tracker: advanced with automatic centroid fallback.
pub struct HybridTracker {
    backend: Backend,
    config: TrackerConfig,
    stats: TrackerStats,
}

impl HybridTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let backend = Backend::Advanced(AdvancedTracker::new(&config));
        HybridTracker {
            backend,
            config,
            stats: TrackerStats {
                total_updates: 0,
                advanced_tracker_errors: 0,
                fallback_activations: 0,
                current_mode: "advanced",
            },
        }
    }

    /// Feed one frame's detections. Returns id → bbox for reportable tracks.
    ///
    /// `now` is the frame timestamp (epoch seconds); all behavioural clocks
    /// run on frame time.
    pub fn update(
        &mut self,
        detections: &[Detection],
        frame: Option<&image::RgbImage>,
        now: f64,
    ) -> HashMap<u64, BBox> {
        self.stats.total_updates += 1;
        match &mut self.backend {
            Backend::Advanced(tracker) => match tracker.update(detections, frame, now) {
                Ok(tracked) => tracked,
                Err(e) => {
                    error!(error = %e, "Advanced tracker failed, falling back to centroid");
                    self.stats.advanced_tracker_errors += 1;
                    self.activate_fallback();
                    self.update_centroid(detections, now)
                }
            },
            Backend::Fallback(_) => self.update_centroid(detections, now),
        }
    }

    fn update_centroid(&mut self, detections: &[Detection], now: f64) -> HashMap<u64, BBox> {
        match &mut self.backend {
            Backend::Fallback(tracker) => {
                let rects: Vec<BBox> = detections.iter().map(|d| d.bbox).collect();
                tracker.update(&rects, now)
            }
            Backend::Advanced(_) => unreachable!("fallback update called in advanced mode"),
        }
    }

    fn activate_fallback(&mut self) {
        warn!("Re-initialising tracker with centroid back-end");
        self.backend = Backend::Fallback(CentroidTracker::new(self.config.max_disappeared));
        self.stats.fallback_activations += 1;
        self.stats.current_mode = "fallback";
        info!("Centroid tracker active (fallback mode)");
    }

    /// Ids of objects loitering past `threshold` seconds.
    pub fn loitering_ids(&self, threshold: f64, now: f64) -> Vec<u64> {
        match &self.backend {
            Backend::Advanced(t) => t.loitering_ids(threshold, now),
            Backend::Fallback(t) => t.loitering_ids(threshold, now),
        }
    }

    /// Detailed loitering state per id; only the advanced back-end has it.
    pub fn detailed_loitering(&self, threshold: f64, now: f64) -> HashMap<u64, LoiteringInfo> {
        match &self.backend {
            Backend::Advanced(t) => t.detailed_loitering(threshold, now),
            Backend::Fallback(_) => HashMap::new(),
        }
    }

    /// Per-track behavioural views for decorating detections. Empty in
    /// fallback mode.
    pub fn track_views(&self) -> Vec<TrackView> {
        match &self.backend {
            Backend::Advanced(t) => t.track_views(),
            Backend::Fallback(_) => Vec::new(),
        }
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    pub fn loitering_threshold(&self) -> f64 {
        self.config.loitering_threshold
    }
}
