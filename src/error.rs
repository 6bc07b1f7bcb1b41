// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArgusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message bus error: {0}")]
    Bus(#[from] lapin::Error),

    #[error("Gateway request failed: {0}")]
    Gateway(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad frame: {0}")]
    Frame(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Pipeline graph error: {0}")]
    Graph(String),

    #[error("Model '{name}' failed: {reason}")]
    Model { name: String, reason: String },

    #[error("Tracker error: {0}")]
    Tracker(String),
}

pub type Result<T> = std::result::Result<T, ArgusError>;
