// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Appearance re-identification features.
//!
//! Each detection crop (64×128) is embedded into a 128-d L2-normalised
//! vector; tracks remember a ring of recent features and match on the mean.
//! The embedding comes from an ONNX Re-ID model when `reid.onnx` is present
//! next to the detection models, and otherwise from a deterministic per-cell
//! colour-statistics projection of the same shape, so cosine matching works
//! without any model files on disk.

use std::collections::VecDeque;
use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::detection::BBox;

pub const FEATURE_DIM: usize = 128;
const FEATURE_HISTORY: usize = 10;
const CROP_WIDTH: u32 = 64;
const CROP_HEIGHT: u32 = 128;
const REID_MODEL_FILE: &str = "reid.onnx";

/// Ring buffer of recent appearance features for one track.
#[derive(Debug, Clone, Default)]
pub struct AppearanceMemory {
    features: VecDeque<Vec<f32>>,
}

impl AppearanceMemory {
    pub fn push(&mut self, feature: Vec<f32>) {
        if self.features.len() == FEATURE_HISTORY {
            self.features.pop_front();
        }
        self.features.push_back(feature);
    }

    /// Mean feature over the history; `None` until the first observation.
    pub fn mean(&self) -> Option<Vec<f32>> {
        if self.features.is_empty() {
            return None;
        }
        let dim = self.features[0].len();
        let mut acc = vec![0.0f32; dim];
        for f in &self.features {
            for (a, v) in acc.iter_mut().zip(f) {
                *a += v;
            }
        }
        let n = self.features.len() as f32;
        for a in &mut acc {
            *a /= n;
        }
        Some(acc)
    }
}

/// Cosine similarity for pre-normalised vectors, clamped to `[0, 1]`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot as f64).clamp(0.0, 1.0)
}

/// Produces appearance embeddings from frame crops.
pub struct AppearanceEncoder {
    session: Option<Mutex<ort::session::Session>>,
}

impl AppearanceEncoder {
    /// Load the Re-ID model if one is available; the projection fallback
    /// needs no files.
    pub fn load(models_path: &Path) -> Self {
        let model_path = models_path.join(REID_MODEL_FILE);
        let session = if model_path.exists() {
            match ort::session::Session::builder()
                .and_then(|b| b.commit_from_file(&model_path))
            {
                Ok(s) => {
                    info!(model = %model_path.display(), "Re-ID model loaded");
                    Some(Mutex::new(s))
                }
                Err(e) => {
                    warn!(error = %e, "Re-ID model failed to load, using projection features");
                    None
                }
            }
        } else {
            None
        };
        AppearanceEncoder { session }
    }

    /// Encoder that never touches the filesystem.
    pub fn projection_only() -> Self {
        AppearanceEncoder { session: None }
    }

    /// Embed the crop under `bbox`. Returns an all-zero vector for
    /// degenerate crops so it contributes nothing to cosine scores.
    pub fn encode(&self, frame: &RgbImage, bbox: &BBox) -> Vec<f32> {
        let Some(crop) = crop_region(frame, bbox, CROP_WIDTH, CROP_HEIGHT) else {
            return vec![0.0; FEATURE_DIM];
        };

        if let Some(session) = &self.session {
            match run_embedding(&mut session.lock(), &crop) {
                Ok(mut feature) => {
                    feature.truncate(FEATURE_DIM);
                    feature.resize(FEATURE_DIM, 0.0);
                    l2_normalize(&mut feature);
                    return feature;
                }
                Err(e) => warn!(error = %e, "Re-ID inference failed, using projection features"),
            }
        }

        let mut feature = grid_features(&crop, 4, 8);
        l2_normalize(&mut feature);
        feature
    }
}

fn run_embedding(
    session: &mut ort::session::Session,
    crop: &RgbImage,
) -> std::result::Result<Vec<f32>, ort::Error> {
    let (w, h) = (crop.width() as usize, crop.height() as usize);
    let mut input = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, px) in crop.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
        }
    }
    let outputs = session.run(ort::inputs![ort::value::TensorRef::from_array_view(&input)?])?;
    let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
    Ok(data.to_vec())
}

/// Clamp `bbox` to the frame and resize the crop to `w`×`h`.
pub(crate) fn crop_region(frame: &RgbImage, bbox: &BBox, w: u32, h: u32) -> Option<RgbImage> {
    let x1 = bbox[0].max(0.0) as u32;
    let y1 = bbox[1].max(0.0) as u32;
    let x2 = (bbox[2].min(frame.width() as f64)) as u32;
    let y2 = (bbox[3].min(frame.height() as f64)) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    let crop = image::imageops::crop_imm(frame, x1, y1, x2 - x1, y2 - y1).to_image();
    Some(image::imageops::resize(&crop, w, h, FilterType::Triangle))
}

/// Deterministic per-cell colour statistics: `gx`×`gy` cells, four features
/// each (mean R/G/B + luma spread), in row-major cell order.
pub(crate) fn grid_features(img: &RgbImage, gx: u32, gy: u32) -> Vec<f32> {
    let cell_w = (img.width() / gx).max(1);
    let cell_h = (img.height() / gy).max(1);
    let mut out = Vec::with_capacity((gx * gy * 4) as usize);

    for cy in 0..gy {
        for cx in 0..gx {
            let mut sum = [0.0f64; 3];
            let mut luma = Vec::new();
            let mut count = 0.0f64;
            for y in cy * cell_h..((cy + 1) * cell_h).min(img.height()) {
                for x in cx * cell_w..((cx + 1) * cell_w).min(img.width()) {
                    let px = img.get_pixel(x, y);
                    for c in 0..3 {
                        sum[c] += px[c] as f64;
                    }
                    luma.push(0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64);
                    count += 1.0;
                }
            }
            if count == 0.0 {
                out.extend_from_slice(&[0.0, 0.0, 0.0, 0.0]);
                continue;
            }
            for c in 0..3 {
                out.push((sum[c] / count / 255.0) as f32);
            }
            let lmean = luma.iter().sum::<f64>() / count;
            let lvar = luma.iter().map(|v| (v - lmean).powi(2)).sum::<f64>() / count;
            out.push((lvar.sqrt() / 255.0) as f32);
        }
    }
    out
}

pub(crate) fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
