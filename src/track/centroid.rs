// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Centroid fallback tracker.
//!
//! O(N·M) nearest-neighbour assignment on box centroids. No appearance
//! model, no prediction — cheap enough to run anywhere, and good enough to
//! keep loitering alerts alive when the advanced back-end is unavailable.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::detection::{bbox_center, BBox};

/// Displacement (px) across the position-history window below which an
/// object counts as stationary.
const MOVEMENT_THRESHOLD: f64 = 20.0;

pub struct CentroidTracker {
    next_object_id: u64,
    objects: BTreeMap<u64, [f64; 2]>,
    boxes: HashMap<u64, BBox>,
    disappeared: HashMap<u64, u32>,
    position_history: HashMap<u64, VecDeque<[f64; 2]>>,
    loitering_start: HashMap<u64, Option<f64>>,
    max_disappeared: u32,
}

impl CentroidTracker {
    pub fn new(max_disappeared: u32) -> Self {
        CentroidTracker {
            next_object_id: 0,
            objects: BTreeMap::new(),
            boxes: HashMap::new(),
            disappeared: HashMap::new(),
            position_history: HashMap::new(),
            loitering_start: HashMap::new(),
            max_disappeared,
        }
    }

    fn register(&mut self, centroid: [f64; 2], bbox: BBox, now: f64) {
        let id = self.next_object_id;
        self.next_object_id += 1;
        self.objects.insert(id, centroid);
        self.boxes.insert(id, bbox);
        self.disappeared.insert(id, 0);
        let mut history = VecDeque::with_capacity(self.max_disappeared as usize);
        history.push_back(centroid);
        self.position_history.insert(id, history);
        self.loitering_start.insert(id, Some(now));
    }

    fn deregister(&mut self, id: u64) {
        self.objects.remove(&id);
        self.boxes.remove(&id);
        self.disappeared.remove(&id);
        self.position_history.remove(&id);
        self.loitering_start.remove(&id);
    }

    /// One tracking step over raw boxes. Returns id → bbox for live objects.
    pub fn update(&mut self, rects: &[BBox], now: f64) -> HashMap<u64, BBox> {
        if rects.is_empty() {
            let ids: Vec<u64> = self.disappeared.keys().copied().collect();
            for id in ids {
                let count = self.disappeared.entry(id).or_insert(0);
                *count += 1;
                if *count > self.max_disappeared {
                    self.deregister(id);
                }
            }
            return self.boxes.clone();
        }

        let input_centroids: Vec<[f64; 2]> = rects.iter().map(bbox_center).collect();

        if self.objects.is_empty() {
            for (centroid, rect) in input_centroids.iter().zip(rects) {
                self.register(*centroid, *rect, now);
            }
            return self.boxes.clone();
        }

        let object_ids: Vec<u64> = self.objects.keys().copied().collect();
        let object_centroids: Vec<[f64; 2]> = self.objects.values().copied().collect();

        // Distance matrix, rows = existing objects, cols = new centroids.
        let dist = |a: &[f64; 2], b: &[f64; 2]| ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
        let d: Vec<Vec<f64>> = object_centroids
            .iter()
            .map(|oc| input_centroids.iter().map(|ic| dist(oc, ic)).collect())
            .collect();

        // Rows ordered by their closest match, then greedily take each row's
        // nearest free column.
        let mut row_order: Vec<usize> = (0..d.len()).collect();
        row_order.sort_by(|a, b| {
            let ma = d[*a].iter().cloned().fold(f64::INFINITY, f64::min);
            let mb = d[*b].iter().cloned().fold(f64::INFINITY, f64::min);
            ma.partial_cmp(&mb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut used_rows = vec![false; d.len()];
        let mut used_cols = vec![false; input_centroids.len()];

        for row in row_order {
            let mut best_col = None;
            let mut best_dist = f64::INFINITY;
            for (col, used) in used_cols.iter().enumerate() {
                if !used && d[row][col] < best_dist {
                    best_dist = d[row][col];
                    best_col = Some(col);
                }
            }
            let Some(col) = best_col else { continue };

            let id = object_ids[row];
            self.objects.insert(id, input_centroids[col]);
            self.boxes.insert(id, rects[col]);
            self.disappeared.insert(id, 0);

            let history = self.position_history.entry(id).or_default();
            if history.len() == self.max_disappeared as usize {
                history.pop_front();
            }
            history.push_back(input_centroids[col]);

            if self.has_moved(id) {
                self.loitering_start.insert(id, None);
            } else if self.loitering_start.get(&id).copied().flatten().is_none() {
                self.loitering_start.insert(id, Some(now));
            }

            used_rows[row] = true;
            used_cols[col] = true;
        }

        // Leftover rows disappear a little more; leftover columns are new.
        for (row, used) in used_rows.iter().enumerate() {
            if !used {
                let id = object_ids[row];
                let count = self.disappeared.entry(id).or_insert(0);
                *count += 1;
                if *count > self.max_disappeared {
                    self.deregister(id);
                }
            }
        }
        for (col, used) in used_cols.iter().enumerate() {
            if !used {
                self.register(input_centroids[col], rects[col], now);
            }
        }

        self.boxes.clone()
    }

    /// Rolling displacement across the history window.
    fn has_moved(&self, id: u64) -> bool {
        let Some(history) = self.position_history.get(&id) else {
            return true;
        };
        if history.len() < self.max_disappeared as usize {
            return true;
        }
        let first = history.front().unwrap();
        let last = history.back().unwrap();
        let displacement = ((first[0] - last[0]).powi(2) + (first[1] - last[1]).powi(2)).sqrt();
        displacement > MOVEMENT_THRESHOLD
    }

    pub fn loitering_ids(&self, threshold: f64, now: f64) -> Vec<u64> {
        self.loitering_start
            .iter()
            .filter_map(|(id, start)| match start {
                Some(s) if now - s > threshold => Some(*id),
                _ => None,
            })
            .collect()
    }
}
