// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! dataSink — persists an event (row + snapshot + WsEvent) when the input
//! carries any detections.

use image::RgbImage;
use serde_json::json;
use tracing::error;

use crate::detection::NodeData;
use crate::error::Result;
use crate::nodes::SharedTools;
use crate::pipeline::model::NodeSpec;

pub struct DataSinkNode {
    node_id: String,
    event_type: String,
}

impl DataSinkNode {
    pub fn new(spec: &NodeSpec) -> Self {
        DataSinkNode {
            node_id: spec.id.clone(),
            event_type: spec
                .config_str("event_type")
                .unwrap_or("Generic Detection")
                .to_string(),
        }
    }

    pub async fn execute(
        &mut self,
        frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let detections = input.detections();
        if detections.is_empty() {
            return Ok(NodeData::default());
        }

        let message = format!(
            "{} object(s) of type '{}' detected.",
            detections.len(),
            self.event_type
        );
        let details = json!({ "detections": detections });

        if let Err(e) = tools
            .sink
            .record(
                frame,
                tools.pipeline_id,
                tools.camera_name,
                &self.event_type,
                &message,
                details,
                tools.frame_meta.timestamp,
            )
            .await
        {
            // Sink trouble must not poison the rest of the graph.
            error!(node = self.node_id, error = %e, "Failed to record event");
        }

        Ok(NodeData::default())
    }
}
