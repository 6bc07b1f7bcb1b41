// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP client for the CRUD gateway.
//!
//! The core consumes three endpoints:
//!   GET  /api/cameras                       → camera desired-set
//!   GET  /api/pipelines?camera_name=<n>     → pipelines bound to a camera
//!   POST /api/identities/match              → face identity lookup

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::model::Pipeline;

/// A camera row as served by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraInfo {
    pub id: i64,
    pub name: String,
    pub rtsp_url: String,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
struct MatchRequest<'a> {
    embedding: &'a [f32],
}

/// Response of the identity match RPC.
#[derive(Debug, Clone, Deserialize)]
pub struct MatchResponse {
    #[serde(rename = "match")]
    pub matched: bool,
    pub name: Option<String>,
    pub similarity: Option<f64>,
}

/// Fetches the pipeline list for one camera. Seam for the pipeline cache.
#[async_trait]
pub trait PipelineFetcher: Send + Sync {
    async fn pipelines_for_camera(&self, camera_name: &str) -> Result<Vec<Pipeline>>;
}

/// Fetches the active camera desired-set. Seam for the supervisor.
#[async_trait]
pub trait CameraLister: Send + Sync {
    async fn list_cameras(&self) -> Result<Vec<CameraInfo>>;
}

/// Matches a face embedding against the identity store. Seam for faceMatcher.
#[async_trait]
pub trait IdentityMatcher: Send + Sync {
    async fn match_embedding(&self, embedding: &[f32]) -> Result<MatchResponse>;
}

/// Concrete gateway client.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        ApiClient { base_url: base_url.into(), http }
    }
}

#[async_trait]
impl CameraLister for ApiClient {
    async fn list_cameras(&self) -> Result<Vec<CameraInfo>> {
        let url = format!("{}/api/cameras", self.base_url);
        let cameras = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<CameraInfo>>()
            .await?;
        Ok(cameras)
    }
}

#[async_trait]
impl PipelineFetcher for ApiClient {
    async fn pipelines_for_camera(&self, camera_name: &str) -> Result<Vec<Pipeline>> {
        let url = format!("{}/api/pipelines", self.base_url);
        let pipelines = self
            .http
            .get(&url)
            .query(&[("camera_name", camera_name)])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Pipeline>>()
            .await?;
        Ok(pipelines)
    }
}

#[async_trait]
impl IdentityMatcher for ApiClient {
    async fn match_embedding(&self, embedding: &[f32]) -> Result<MatchResponse> {
        let url = format!("{}/api/identities/match", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&MatchRequest { embedding })
            .send()
            .await?
            .error_for_status()?
            .json::<MatchResponse>()
            .await?;
        Ok(resp)
    }
}
