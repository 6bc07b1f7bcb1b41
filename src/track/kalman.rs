// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-track state: a constant-velocity Kalman box filter plus the
//! behavioural memory (movement, loitering clock, trajectory).
//!
//! Filter state is `[cx, cy, s, h, ċx, ċy, ḣ]` with `s = w/h`; only
//! `[cx, cy, s, h]` is observed.

use std::collections::VecDeque;

use nalgebra::{SMatrix, SVector};
use serde_json::json;

use crate::detection::BBox;
use crate::error::{ArgusError, Result};

type V7 = SVector<f64, 7>;
type M7 = SMatrix<f64, 7, 7>;
type V4 = SVector<f64, 4>;
type M4 = SMatrix<f64, 4, 4>;
type M47 = SMatrix<f64, 4, 7>;

/// Positions kept for the significant-movement test.
const POSITION_HISTORY: usize = 30;
/// Mean displacement (px) between the last-10 and previous-10 windows that
/// counts as significant movement.
const SIGNIFICANT_MOVE_PX: f64 = 25.0;
/// Trajectory points used for the speed estimate.
const SPEED_WINDOW: usize = 5;

/// Constant-velocity Kalman filter over a bounding box.
#[derive(Debug, Clone)]
pub struct KalmanBoxFilter {
    x: V7,
    p: M7,
    f: M7,
    h: M47,
    q: M7,
    r: M4,
}

impl KalmanBoxFilter {
    pub fn new(bbox: &BBox) -> Self {
        let mut f = M7::identity();
        f[(0, 4)] = 1.0;
        f[(1, 5)] = 1.0;
        f[(3, 6)] = 1.0;

        let mut h = M47::zeros();
        for i in 0..4 {
            h[(i, i)] = 1.0;
        }

        let mut r = M4::identity();
        r[(2, 2)] *= 10.0;
        r[(3, 3)] *= 10.0;

        let mut p = M7::identity();
        for i in 4..7 {
            p[(i, i)] *= 1000.0;
        }
        p *= 10.0;

        let mut q = M7::identity();
        q[(6, 6)] *= 0.01;
        for i in 4..7 {
            q[(i, i)] *= 0.01;
        }

        let mut x = V7::zeros();
        let z = bbox_to_z(bbox);
        x.fixed_rows_mut::<4>(0).copy_from(&z);

        KalmanBoxFilter { x, p, f, h, q, r }
    }

    /// Forward the state one step.
    pub fn predict(&mut self) -> BBox {
        // A negative height velocity must not collapse the box below zero.
        if self.x[6] + self.x[3] <= 0.0 {
            self.x[6] = 0.0;
        }
        self.x = self.f * self.x;
        self.p = self.f * self.p * self.f.transpose() + self.q;
        x_to_bbox(&self.x)
    }

    /// Fold in a new observation.
    pub fn update(&mut self, bbox: &BBox) -> Result<()> {
        let z = bbox_to_z(bbox);
        let y = z - self.h * self.x;
        let s = self.h * self.p * self.h.transpose() + self.r;
        let s_inv = s
            .try_inverse()
            .ok_or_else(|| ArgusError::Tracker("singular innovation covariance".into()))?;
        let k = self.p * self.h.transpose() * s_inv;
        self.x += k * y;
        self.p = (M7::identity() - k * self.h) * self.p;
        Ok(())
    }

    pub fn bbox(&self) -> BBox {
        x_to_bbox(&self.x)
    }
}

fn bbox_to_z(bbox: &BBox) -> V4 {
    let w = bbox[2] - bbox[0];
    let h = bbox[3] - bbox[1];
    V4::new(bbox[0] + w / 2.0, bbox[1] + h / 2.0, w / h, h)
}

fn x_to_bbox(x: &V7) -> BBox {
    let h = x[3];
    let w = x[2] * h;
    [x[0] - w / 2.0, x[1] - h / 2.0, x[0] + w / 2.0, x[1] + h / 2.0]
}

/// Movement / loitering / trajectory memory of one track.
#[derive(Debug, Clone, Default)]
pub struct BehaviourState {
    positions: VecDeque<[f64; 2]>,
    pub loitering_start: Option<f64>,
    trajectory: Vec<[f64; 2]>,
    pub speed: f64,
    pub direction: f64,
}

impl BehaviourState {
    /// Record this frame's centre and advance all derived state.
    pub fn record(&mut self, center: [f64; 2], now: f64) {
        if self.positions.len() == POSITION_HISTORY {
            self.positions.pop_front();
        }
        self.positions.push_back(center);

        if self.moved_significantly() {
            self.loitering_start = None;
        } else if self.loitering_start.is_none() {
            self.loitering_start = Some(now);
        }

        self.trajectory.push(center);
        if self.trajectory.len() >= 2 {
            self.speed = self.estimate_speed();
            self.direction = self.estimate_direction();
        }
    }

    /// Mean of the last 10 positions vs the oldest 10 in the window,
    /// > 25 px apart. Young tracks (< 10 positions) count as moving.
    fn moved_significantly(&self) -> bool {
        let n = self.positions.len();
        if n < 10 {
            return true;
        }
        let recent: Vec<[f64; 2]> = self.positions.iter().skip(n - 10).copied().collect();
        let old: Vec<[f64; 2]> = if n >= 20 {
            self.positions.iter().take(10).copied().collect()
        } else {
            recent[..5].to_vec()
        };
        let displacement = point_dist(&mean(&recent), &mean(&old));
        displacement > SIGNIFICANT_MOVE_PX
    }

    pub fn is_loitering(&self, threshold: f64, now: f64) -> bool {
        matches!(self.loitering_start, Some(start) if now - start > threshold)
    }

    pub fn loitering_duration(&self, now: f64) -> f64 {
        self.loitering_start.map(|s| now - s).unwrap_or(0.0)
    }

    /// Mean displacement per frame over the recent trajectory.
    fn estimate_speed(&self) -> f64 {
        let pts = self.recent_points(SPEED_WINDOW);
        if pts.len() < 2 {
            return 0.0;
        }
        let total: f64 = pts.windows(2).map(|w| point_dist(&w[0], &w[1])).sum();
        total / (pts.len() - 1) as f64
    }

    /// Heading in degrees over the last few points (0° = right, 90° = down).
    fn estimate_direction(&self) -> f64 {
        let pts = self.recent_points(SPEED_WINDOW);
        if pts.len() < 2 {
            return 0.0;
        }
        let start = pts[0];
        let end = pts[pts.len() - 1];
        (end[1] - start[1]).atan2(end[0] - start[0]).to_degrees()
    }

    fn recent_points(&self, window: usize) -> Vec<[f64; 2]> {
        let n = self.trajectory.len();
        self.trajectory[n.saturating_sub(window)..].to_vec()
    }

    pub fn trajectory_len(&self) -> usize {
        self.trajectory.len()
    }

    /// Coarse movement class by speed band.
    pub fn movement_pattern(&self) -> &'static str {
        if self.speed < 2.0 {
            "stationary"
        } else if self.speed < 8.0 {
            "walking"
        } else if self.speed < 20.0 {
            "running"
        } else {
            "irregular"
        }
    }

    /// Whole-trajectory summary for the detection decoration.
    pub fn trajectory_summary(&self) -> Option<serde_json::Value> {
        if self.trajectory.len() < 3 {
            return None;
        }
        let total: f64 = self
            .trajectory
            .windows(2)
            .map(|w| point_dist(&w[0], &w[1]))
            .sum();
        let straight = point_dist(&self.trajectory[0], &self.trajectory[self.trajectory.len() - 1]);
        let sinuosity = total / straight.max(1.0);
        Some(json!({
            "total_distance": total,
            "straight_distance": straight,
            "sinuosity": sinuosity,
            "avg_speed": self.speed,
            "direction": self.direction,
            "pattern": self.movement_pattern(),
            "duration": self.trajectory.len(),
            "start_position": self.trajectory[0],
            "current_position": self.trajectory[self.trajectory.len() - 1],
        }))
    }
}

fn mean(points: &[[f64; 2]]) -> [f64; 2] {
    let n = points.len() as f64;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    [sx / n, sy / n]
}

fn point_dist(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}
