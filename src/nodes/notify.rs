// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Notification sinks. These act on detections but never modify the data
//! flowing through the graph; failures log and stop there.

use image::RgbImage;
use serde_json::json;
use tracing::{error, info, warn};

use crate::bus::NOTIFICATIONS_QUEUE;
use crate::detection::NodeData;
use crate::error::Result;
use crate::nodes::SharedTools;
use crate::pipeline::model::NodeSpec;

const DEFAULT_MESSAGE: &str = "Alert: {count} object(s) detected on camera {camera}.";

fn format_message(template: &str, count: usize, camera: &str) -> String {
    template
        .replace("{count}", &count.to_string())
        .replace("{camera}", camera)
}

/// telegram — posts to the Bot API with node-configured credentials.
pub struct TelegramNode {
    node_id: String,
    bot_token: Option<String>,
    chat_id: Option<String>,
    message: String,
    http: reqwest::Client,
}

impl TelegramNode {
    pub fn new(spec: &NodeSpec) -> Self {
        TelegramNode {
            node_id: spec.id.clone(),
            bot_token: spec.config_str("bot_token").map(str::to_string),
            chat_id: spec.config_str("chat_id").map(str::to_string),
            message: spec.config_str("message").unwrap_or(DEFAULT_MESSAGE).to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn execute(
        &mut self,
        _frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let detections = input.detections();
        if detections.is_empty() {
            return Ok(NodeData::default());
        }

        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            warn!(node = self.node_id, "Telegram bot token or chat id not configured, skipping");
            return Ok(NodeData::default());
        };

        let text = format_message(&self.message, detections.len(), tools.camera_name);
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let payload = json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" });

        match self.http.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(node = self.node_id, chat = %chat_id, "Telegram notification sent");
            }
            Ok(resp) => {
                error!(node = self.node_id, status = %resp.status(), "Telegram API rejected notification");
            }
            Err(e) => {
                error!(node = self.node_id, error = %e, "Telegram notification failed");
            }
        }
        Ok(NodeData::default())
    }
}

/// email — wiring exists, delivery pending an SMTP relay decision.
pub struct EmailNode {
    node_id: String,
}

impl EmailNode {
    pub fn new(spec: &NodeSpec) -> Self {
        EmailNode { node_id: spec.id.clone() }
    }

    pub fn execute(
        &mut self,
        _frame: &RgbImage,
        input: &NodeData,
        _tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        if !input.detections().is_empty() {
            info!(node = self.node_id, "Email notification requested (delivery not wired up)");
        }
        Ok(NodeData::default())
    }
}

/// whatsapp — wiring exists, delivery pending a provider decision.
pub struct WhatsAppNode {
    node_id: String,
}

impl WhatsAppNode {
    pub fn new(spec: &NodeSpec) -> Self {
        WhatsAppNode { node_id: spec.id.clone() }
    }

    pub fn execute(
        &mut self,
        _frame: &RgbImage,
        input: &NodeData,
        _tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        if !input.detections().is_empty() {
            info!(node = self.node_id, "WhatsApp notification requested (delivery not wired up)");
        }
        Ok(NodeData::default())
    }
}

/// notification — queues `{subject, body}` durably for deferred delivery.
pub struct NotificationNode {
    node_id: String,
    message: String,
}

impl NotificationNode {
    pub fn new(spec: &NodeSpec) -> Self {
        NotificationNode {
            node_id: spec.id.clone(),
            message: spec.config_str("message").unwrap_or(DEFAULT_MESSAGE).to_string(),
        }
    }

    pub async fn execute(
        &mut self,
        _frame: &RgbImage,
        input: &NodeData,
        tools: &mut SharedTools<'_>,
    ) -> Result<NodeData> {
        let detections = input.detections();
        if detections.is_empty() {
            return Ok(NodeData::default());
        }

        let Some(bus) = tools.bus else {
            warn!(node = self.node_id, "No bus channel available, notification dropped");
            return Ok(NodeData::default());
        };

        let payload = json!({
            "subject": format!("Pipeline alert: {}", tools.pipeline_name),
            "body": format_message(&self.message, detections.len(), tools.camera_name),
        });
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(e) = bus.publish_durable("", NOTIFICATIONS_QUEUE, &bytes).await {
                    error!(node = self.node_id, error = %e, "Failed to queue notification");
                } else {
                    info!(node = self.node_id, pipeline = tools.pipeline_name, "Notification queued");
                }
            }
            Err(e) => error!(node = self.node_id, error = %e, "Notification payload serialization failed"),
        }
        Ok(NodeData::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_template_formats_count_and_camera() {
        let msg = format_message("Saw {count} on {camera}", 3, "cam-A");
        assert_eq!(msg, "Saw 3 on cam-A");
        let msg = format_message(DEFAULT_MESSAGE, 1, "gate");
        assert!(msg.contains("1 object(s)"));
        assert!(msg.contains("gate"));
    }
}
