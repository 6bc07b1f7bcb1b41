// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Event persistence and real-time notification.
//!
//! A data sink records three things per triggered frame: an `events` row, a
//! JPEG snapshot under the media directory, and a compact WsEvent on the
//! fan-out exchange for live UIs. A failed notification never aborts the
//! insert.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use image::RgbImage;
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};

use crate::bus::{BusPublisher, WS_EXCHANGE};
use crate::error::Result;

/// A new `events` row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub pipeline_id: i64,
    pub camera_name: String,
    pub event_type: String,
    pub message: String,
    pub media_path: Option<String>,
    pub details: Value,
}

/// Compact notification pushed to UI clients.
#[derive(Debug, Clone, Serialize)]
pub struct WsEvent {
    pub pipeline_id: i64,
    pub camera_name: String,
    pub event_type: String,
    pub timestamp: f64,
}

/// Storage backend for events.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &NewEvent) -> Result<()>;
}

/// Postgres-backed store over the `events` table.
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub async fn connect(db_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(4).connect(db_url).await?;
        Ok(PgEventStore { pool })
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn insert_event(&self, event: &NewEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (pipeline_id, timestamp, camera_name, event_type, message, media_path, details) \
             VALUES ($1, NOW(), $2, $3, $4, $5, $6)",
        )
        .bind(event.pipeline_id)
        .bind(&event.camera_name)
        .bind(&event.event_type)
        .bind(&event.message)
        .bind(&event.media_path)
        .bind(&event.details)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// The sink behind every dataSink node of a process.
pub struct EventSink {
    store: Option<Arc<dyn EventStore>>,
    publisher: Option<Arc<dyn BusPublisher>>,
    media_path: PathBuf,
}

impl EventSink {
    pub fn new(
        store: Option<Arc<dyn EventStore>>,
        publisher: Option<Arc<dyn BusPublisher>>,
        media_path: impl Into<PathBuf>,
    ) -> Self {
        EventSink { store, publisher, media_path: media_path.into() }
    }

    /// Persist one event with its snapshot and notify subscribers.
    pub async fn record(
        &self,
        frame: &RgbImage,
        pipeline_id: i64,
        camera_name: &str,
        event_type: &str,
        message: &str,
        details: Value,
        timestamp: f64,
    ) -> Result<()> {
        let media_path = match self.save_media(frame, camera_name) {
            Ok(p) => Some(p),
            Err(e) => {
                error!(camera = camera_name, error = %e, "Could not save media snapshot");
                None
            }
        };

        if let Some(store) = &self.store {
            let event = NewEvent {
                pipeline_id,
                camera_name: camera_name.to_string(),
                event_type: event_type.to_string(),
                message: message.to_string(),
                media_path,
                details,
            };
            store.insert_event(&event).await?;
            info!(camera = camera_name, event_type, "Event persisted");
        }

        // Real-time notification is best-effort by contract.
        if let Some(publisher) = &self.publisher {
            let ws_event = WsEvent {
                pipeline_id,
                camera_name: camera_name.to_string(),
                event_type: event_type.to_string(),
                timestamp,
            };
            match serde_json::to_vec(&ws_event) {
                Ok(payload) => {
                    if let Err(e) = publisher.publish(WS_EXCHANGE, "", &payload).await {
                        error!(error = %e, "WsEvent publish failed");
                    }
                }
                Err(e) => error!(error = %e, "WsEvent serialization failed"),
            }
        }
        Ok(())
    }

    /// Write the frame as `<camera>_<YYYYMMDD_HHMMSS_microseconds>.jpg` and
    /// return the relative path the API serves it under.
    fn save_media(&self, frame: &RgbImage, camera_name: &str) -> Result<String> {
        std::fs::create_dir_all(&self.media_path)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let filename = format!("{camera_name}_{stamp}.jpg");
        let full_path = self.media_path.join(&filename);

        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
        encoder.encode_image(frame)?;
        std::fs::write(&full_path, &jpeg)?;
        info!(path = %full_path.display(), "Saved media snapshot");
        Ok(format!("/media/{filename}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct MemoryStore {
        events: Mutex<Vec<NewEvent>>,
    }

    #[async_trait]
    impl EventStore for MemoryStore {
        async fn insert_event(&self, event: &NewEvent) -> Result<()> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct FailingPublisher;

    #[async_trait]
    impl BusPublisher for FailingPublisher {
        async fn publish(&self, _e: &str, _k: &str, _p: &[u8]) -> Result<()> {
            Err(crate::error::ArgusError::Frame("broker down".into()))
        }

        async fn publish_durable(&self, _e: &str, _k: &str, _p: &[u8]) -> Result<()> {
            Err(crate::error::ArgusError::Frame("broker down".into()))
        }
    }

    #[tokio::test]
    async fn record_writes_jpeg_and_row_even_if_notify_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore { events: Mutex::new(Vec::new()) });
        let sink = EventSink::new(
            Some(store.clone()),
            Some(Arc::new(FailingPublisher)),
            dir.path(),
        );

        let frame = RgbImage::from_pixel(32, 24, image::Rgb([10, 200, 10]));
        sink.record(
            &frame,
            7,
            "cam-A",
            "Generic Detection",
            "1 object(s) detected",
            serde_json::json!({"detections": []}),
            1000.0,
        )
        .await
        .unwrap();

        let events = store.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].camera_name, "cam-A");
        let media = events[0].media_path.as_ref().unwrap();
        assert!(media.starts_with("/media/cam-A_"));
        assert!(media.ends_with(".jpg"));

        // Exactly one decodable JPEG on disk.
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let bytes = std::fs::read(files[0].as_ref().unwrap().path()).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (32, 24));
    }
}
