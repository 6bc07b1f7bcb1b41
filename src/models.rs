// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Process-wide detection model registry.
//!
//! Models are loaded at most once per filename, behind a per-key one-shot
//! cell; after first use every access is a cheap map read. Loading prefers a
//! sibling optimised build (`<stem>.engine`); when only the portable model
//! exists the optimised form is exported best-effort for the next start.
//! Every failure degrades one step: requested model → default small model →
//! null detector (detection still runs, finds nothing).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::detection::Detection;

pub const DEFAULT_MODEL: &str = "yolov8n.onnx";
/// Raw candidates below this score are dropped before NMS; node configs
/// apply their own (higher) thresholds on top.
const BASE_CONFIDENCE: f32 = 0.25;
const NMS_IOU_THRESHOLD: f64 = 0.45;
const INPUT_SIZE: u32 = 640;

const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Object detection capability. The registry hands these out; tests inject
/// their own.
pub trait Detect: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Vec<Detection>;
}

/// Detector of last resort: always runs, never finds anything.
pub struct NullDetector;

impl Detect for NullDetector {
    fn detect(&self, _frame: &RgbImage) -> Vec<Detection> {
        Vec::new()
    }
}

/// YOLO-family detector over ONNX Runtime.
pub struct OrtDetector {
    session: Mutex<ort::session::Session>,
}

impl OrtDetector {
    /// Load `path`. When `optimized_out` is set, ask the runtime to write
    /// the optimised graph there as a side effect (best-effort).
    pub fn load(path: &Path, optimized_out: Option<&Path>, use_gpu: bool) -> std::result::Result<Self, ort::Error> {
        let mut builder = ort::session::Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?;
        if use_gpu {
            builder = builder.with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build(),
            ])?;
        }
        if let Some(out) = optimized_out {
            match builder.with_optimized_model_path(out.to_string_lossy().as_ref()) {
                Ok(b) => builder = b,
                Err(e) => {
                    warn!(error = %e, "Optimised model export unavailable");
                    builder = ort::session::Session::builder()?
                        .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?;
                }
            }
        }
        let session = builder.commit_from_file(path)?;
        Ok(OrtDetector { session: Mutex::new(session) })
    }

    fn preprocess(frame: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(frame, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let mut input = Array4::<f32>::zeros((1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize));
        for (x, y, px) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
            }
        }
        input
    }

    /// Parse the `[1, 4 + classes, anchors]` output layout.
    fn postprocess(shape: &[i64], data: &[f32], sx: f64, sy: f64) -> Vec<Detection> {
        if shape.len() != 3 || shape[1] < 5 {
            return Vec::new();
        }
        let attrs = shape[1] as usize;
        let n = shape[2] as usize;
        let classes = attrs - 4;

        let mut candidates: Vec<Detection> = Vec::new();
        for j in 0..n {
            let mut best = 0.0f32;
            let mut best_class = 0usize;
            for c in 0..classes {
                let s = data[(4 + c) * n + j];
                if s > best {
                    best = s;
                    best_class = c;
                }
            }
            if best < BASE_CONFIDENCE {
                continue;
            }
            let cx = data[j] as f64;
            let cy = data[n + j] as f64;
            let w = data[2 * n + j] as f64;
            let h = data[3 * n + j] as f64;
            let bbox = [
                (cx - w / 2.0) * sx,
                (cy - h / 2.0) * sy,
                (cx + w / 2.0) * sx,
                (cy + h / 2.0) * sy,
            ];
            let class_name = COCO_CLASSES
                .get(best_class)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("class_{best_class}"));
            candidates.push(Detection::new(bbox, best as f64, class_name, best_class as i64));
        }
        nms(candidates, NMS_IOU_THRESHOLD)
    }
}

impl Detect for OrtDetector {
    fn detect(&self, frame: &RgbImage) -> Vec<Detection> {
        let input = Self::preprocess(frame);
        let sx = frame.width() as f64 / INPUT_SIZE as f64;
        let sy = frame.height() as f64 / INPUT_SIZE as f64;

        let mut session = self.session.lock();
        let run = ort::value::TensorRef::from_array_view(&input)
            .and_then(|tensor| session.run(ort::inputs![tensor]));
        match run {
            Ok(outputs) => match outputs[0].try_extract_tensor::<f32>() {
                Ok((shape, data)) => Self::postprocess(shape, data, sx, sy),
                Err(e) => {
                    warn!(error = %e, "Unreadable detector output");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "Inference failed");
                Vec::new()
            }
        }
    }
}

/// Greedy non-maximum suppression, highest confidence first.
fn nms(mut candidates: Vec<Detection>, iou_threshold: f64) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Detection> = Vec::new();
    for det in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class_id == det.class_id && crate::track::advanced::iou(&k.bbox, &det.bbox) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

/// Process-wide `filename → detector` cache.
pub struct ModelRegistry {
    models_path: PathBuf,
    use_gpu: bool,
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<dyn Detect>>>>>,
}

impl ModelRegistry {
    pub fn new(models_path: impl Into<PathBuf>, use_gpu: bool) -> Self {
        ModelRegistry { models_path: models_path.into(), use_gpu, entries: Mutex::new(HashMap::new()) }
    }

    /// Detector for `filename`, loading it on first access. Never fails:
    /// the degradation chain bottoms out at the null detector.
    pub fn get(&self, filename: &str) -> Arc<dyn Detect> {
        let cell = {
            let mut entries = self.entries.lock();
            entries.entry(filename.to_string()).or_default().clone()
        };
        // Construction happens at most once per key; concurrent readers of a
        // loaded entry never contend here.
        cell.get_or_init(|| self.load(filename)).clone()
    }

    /// Pre-seed a detector (pipeline preload, tests).
    pub fn insert(&self, filename: &str, detector: Arc<dyn Detect>) {
        let cell = Arc::new(OnceCell::new());
        let _ = cell.set(detector);
        self.entries.lock().insert(filename.to_string(), cell);
    }

    fn load(&self, filename: &str) -> Arc<dyn Detect> {
        let path = self.models_path.join(filename);
        if !path.exists() {
            warn!(model = filename, path = %path.display(), "Model file not found");
            return self.default_detector(filename);
        }

        let engine_path = path.with_extension("engine");
        if engine_path.exists() {
            match OrtDetector::load(&engine_path, None, self.use_gpu) {
                Ok(det) => {
                    info!(model = filename, "Loaded optimised build");
                    return Arc::new(det);
                }
                Err(e) => {
                    warn!(model = filename, error = %e, "Optimised build failed to load, using portable model");
                }
            }
        }

        match OrtDetector::load(&path, Some(&engine_path), self.use_gpu) {
            Ok(det) => {
                info!(model = filename, "Loaded portable model");
                Arc::new(det)
            }
            Err(e) => {
                warn!(model = filename, error = %e, "Model failed to load");
                self.default_detector(filename)
            }
        }
    }

    fn default_detector(&self, failed: &str) -> Arc<dyn Detect> {
        if failed != DEFAULT_MODEL {
            let fallback = self.models_path.join(DEFAULT_MODEL);
            if fallback.exists() {
                if let Ok(det) = OrtDetector::load(&fallback, None, self.use_gpu) {
                    warn!(model = failed, "Falling back to default model");
                    return Arc::new(det);
                }
            }
        }
        warn!(model = failed, "No usable model, detection disabled for this node");
        Arc::new(NullDetector)
    }
}
