// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Face pipeline: detect → embed → match.
//!
//! Matching is an RPC against the gateway's identity store; this process
//! never touches the persisted embedding vectors itself.

use std::path::Path;

use image::RgbImage;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::detection::{Face, FaceEmbedding, Identity, NodeData};
use crate::error::Result;
use crate::nodes::SharedTools;
use crate::pipeline::model::NodeSpec;
use crate::track::appearance::{crop_region, grid_features, l2_normalize};

const DEFAULT_FACE_MODEL: &str = "face_detector.onnx";
const FACE_EMBED_MODEL: &str = "arcface.onnx";
pub const FACE_EMBEDDING_DIM: usize = 512;
const FACE_CROP: u32 = 112;

/// faceDetector — face boxes from a registry model.
pub struct FaceDetectorNode {
    node_id: String,
    model_filename: String,
    confidence: f64,
}

impl FaceDetectorNode {
    pub fn new(spec: &NodeSpec) -> Self {
        FaceDetectorNode {
            node_id: spec.id.clone(),
            model_filename: spec
                .config_str("model_filename")
                .unwrap_or(DEFAULT_FACE_MODEL)
                .to_string(),
            confidence: spec.config_f64("confidence", 0.5),
        }
    }

    pub fn execute(
        &mut self,
        frame: &RgbImage,
        _input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let detector = tools.models.get(&self.model_filename);
        let faces: Vec<Face> = detector
            .detect(frame)
            .into_iter()
            .filter(|d| d.confidence >= self.confidence)
            .map(|d| Face { bbox: d.bbox, confidence: d.confidence })
            .collect();
        debug!(node = self.node_id, count = faces.len(), "Faces detected");
        Ok(NodeData { faces: Some(faces), ..Default::default() })
    }
}

/// Produces 512-d L2-normalised face embeddings. Uses `arcface.onnx` when
/// present; otherwise a deterministic projection with the same contract.
pub struct FaceEmbedder {
    session: Option<Mutex<ort::session::Session>>,
}

impl FaceEmbedder {
    pub fn load(models_path: &Path) -> Self {
        let model_path = models_path.join(FACE_EMBED_MODEL);
        let session = if model_path.exists() {
            match ort::session::Session::builder().and_then(|b| b.commit_from_file(&model_path)) {
                Ok(s) => Some(Mutex::new(s)),
                Err(e) => {
                    warn!(error = %e, "Face embedding model failed to load, using projection");
                    None
                }
            }
        } else {
            None
        };
        FaceEmbedder { session }
    }

    pub fn projection_only() -> Self {
        FaceEmbedder { session: None }
    }

    pub fn embed(&self, frame: &RgbImage, bbox: &[f64; 4]) -> Option<Vec<f32>> {
        let crop = crop_region(frame, bbox, FACE_CROP, FACE_CROP)?;

        if let Some(session) = &self.session {
            match run_embedding(&mut session.lock(), &crop) {
                Ok(mut v) => {
                    v.truncate(FACE_EMBEDDING_DIM);
                    v.resize(FACE_EMBEDDING_DIM, 0.0);
                    l2_normalize(&mut v);
                    return Some(v);
                }
                Err(e) => warn!(error = %e, "Face embedding inference failed, using projection"),
            }
        }

        // 8×16 cells × 4 statistics = 512 dims.
        let mut v = grid_features(&crop, 8, 16);
        l2_normalize(&mut v);
        Some(v)
    }
}

fn run_embedding(
    session: &mut ort::session::Session,
    crop: &RgbImage,
) -> std::result::Result<Vec<f32>, ort::Error> {
    let (w, h) = (crop.width() as usize, crop.height() as usize);
    let mut input = ndarray::Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, px) in crop.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = px[c] as f32 / 255.0;
        }
    }
    let outputs = session.run(ort::inputs![ort::value::TensorRef::from_array_view(&input)?])?;
    let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
    Ok(data.to_vec())
}

/// faceEmbedding — one embedding per detected face.
pub struct FaceEmbeddingNode {
    node_id: String,
}

impl FaceEmbeddingNode {
    pub fn new(spec: &NodeSpec) -> Self {
        FaceEmbeddingNode { node_id: spec.id.clone() }
    }

    pub fn execute(
        &mut self,
        frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let faces = input.faces();
        if faces.is_empty() {
            return Ok(NodeData { embeddings: Some(Vec::new()), ..Default::default() });
        }

        let mut embeddings = Vec::with_capacity(faces.len());
        for face in faces {
            let Some(embedding) = tools.embedder.embed(frame, &face.bbox) else {
                warn!(node = self.node_id, "Skipping degenerate face crop");
                continue;
            };
            embeddings.push(FaceEmbedding { bbox: face.bbox, embedding, identity: None });
        }
        debug!(node = self.node_id, count = embeddings.len(), "Embeddings produced");
        Ok(NodeData { embeddings: Some(embeddings), ..Default::default() })
    }
}

/// faceMatcher — looks each embedding up in the identity store.
pub struct FaceMatcherNode {
    node_id: String,
}

impl FaceMatcherNode {
    pub fn new(spec: &NodeSpec) -> Self {
        FaceMatcherNode { node_id: spec.id.clone() }
    }

    pub async fn execute(
        &mut self,
        _frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let mut embeddings = input.embeddings().to_vec();
        for entry in &mut embeddings {
            match tools.matcher.match_embedding(&entry.embedding).await {
                Ok(resp) if resp.matched => {
                    entry.identity = Some(Some(Identity::Match {
                        name: resp.name.unwrap_or_default(),
                        similarity: (resp.similarity.unwrap_or(0.0) * 100.0).round() / 100.0,
                    }));
                }
                Ok(_) => entry.identity = Some(None),
                Err(e) => {
                    warn!(node = self.node_id, error = %e, "Identity match RPC failed");
                    entry.identity =
                        Some(Some(Identity::Error { error: "identity service unavailable".into() }));
                }
            }
        }
        Ok(NodeData { embeddings: Some(embeddings), ..Default::default() })
    }
}
