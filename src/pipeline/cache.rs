// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-camera pipeline cache.
//!
//! Misses hit the gateway and cache the first pipeline returned — or a
//! negative entry, so a camera without a pipeline does not hammer the API on
//! every frame. Entries are dropped by `pipeline.updated` events and expire
//! after a TTL as a backstop against lost invalidations. A stale entry may
//! execute once after a CRUD mutation; that window is by contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::api::PipelineFetcher;
use crate::pipeline::model::Pipeline;

struct CacheEntry {
    pipeline: Option<Arc<Pipeline>>,
    fetched_at: Instant,
}

pub struct PipelineCache {
    fetcher: Arc<dyn PipelineFetcher>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl PipelineCache {
    pub fn new(fetcher: Arc<dyn PipelineFetcher>, ttl: Duration) -> Self {
        PipelineCache { fetcher, entries: Mutex::new(HashMap::new()), ttl }
    }

    /// Pipeline currently bound to `camera_name`, if any.
    ///
    /// First active pipeline returned by the gateway wins. Fetch errors are
    /// cached as negative entries and retried after invalidation or TTL.
    pub async fn get(&self, camera_name: &str) -> Option<Arc<Pipeline>> {
        if let Some(hit) = self.lookup(camera_name) {
            debug!(camera = camera_name, "Pipeline cache hit");
            return hit;
        }

        info!(camera = camera_name, "Pipeline cache miss, fetching from gateway");
        let pipeline = match self.fetcher.pipelines_for_camera(camera_name).await {
            Ok(pipelines) => {
                if pipelines.is_empty() {
                    warn!(camera = camera_name, "No active pipeline for camera");
                }
                pipelines.into_iter().next().map(Arc::new)
            }
            Err(e) => {
                warn!(camera = camera_name, error = %e, "Pipeline fetch failed");
                None
            }
        };

        self.entries.lock().insert(
            camera_name.to_string(),
            CacheEntry { pipeline: pipeline.clone(), fetched_at: Instant::now() },
        );
        pipeline
    }

    /// Drop the entry for one camera; the next `get` refetches.
    pub fn invalidate(&self, camera_name: &str) {
        self.entries.lock().remove(camera_name);
    }

    /// `Some(cached)` on a live hit (including negative hits), `None` on miss.
    fn lookup(&self, camera_name: &str) -> Option<Option<Arc<Pipeline>>> {
        let entries = self.entries.lock();
        let entry = entries.get(camera_name)?;
        if entry.fetched_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.pipeline.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubFetcher {
        calls: AtomicUsize,
        pipelines: Mutex<Vec<Pipeline>>,
    }

    impl StubFetcher {
        fn serving(pipelines: Vec<Pipeline>) -> Self {
            StubFetcher { calls: AtomicUsize::new(0), pipelines: Mutex::new(pipelines) }
        }
    }

    #[async_trait]
    impl PipelineFetcher for StubFetcher {
        async fn pipelines_for_camera(&self, _camera: &str) -> Result<Vec<Pipeline>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pipelines.lock().clone())
        }
    }

    fn pipeline(id: i64, name: &str) -> Pipeline {
        serde_json::from_value(json!({
            "id": id,
            "name": name,
            "is_active": true,
            "graph_data": {"nodes": [], "edges": []}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn miss_then_hit_fetches_once() {
        let fetcher = Arc::new(StubFetcher::serving(vec![pipeline(1, "p1")]));
        let cache = PipelineCache::new(fetcher.clone(), Duration::from_secs(300));

        assert_eq!(cache.get("cam-A").await.unwrap().id, 1);
        assert_eq!(cache.get("cam-A").await.unwrap().id, 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_result_is_negative_cached() {
        let fetcher = Arc::new(StubFetcher::serving(vec![]));
        let cache = PipelineCache::new(fetcher.clone(), Duration::from_secs(300));

        assert!(cache.get("cam-A").await.is_none());
        assert!(cache.get("cam-A").await.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1, "negative hit served from cache");
    }

    #[tokio::test]
    async fn invalidate_forces_refetch_of_latest() {
        let fetcher = Arc::new(StubFetcher::serving(vec![pipeline(1, "old")]));
        let cache = PipelineCache::new(fetcher.clone(), Duration::from_secs(300));

        assert_eq!(cache.get("cam-A").await.unwrap().name, "old");

        *fetcher.pipelines.lock() = vec![pipeline(2, "new")];
        cache.invalidate("cam-A");

        assert_eq!(cache.get("cam-A").await.unwrap().name, "new");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_pipeline_wins_when_multiple_active() {
        let fetcher = Arc::new(StubFetcher::serving(vec![pipeline(1, "first"), pipeline(2, "second")]));
        let cache = PipelineCache::new(fetcher, Duration::from_secs(300));
        assert_eq!(cache.get("cam-A").await.unwrap().name, "first");
    }

    #[tokio::test]
    async fn ttl_expiry_refetches() {
        let fetcher = Arc::new(StubFetcher::serving(vec![pipeline(1, "p1")]));
        let cache = PipelineCache::new(fetcher.clone(), Duration::from_millis(0));

        cache.get("cam-A").await;
        cache.get("cam-A").await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
