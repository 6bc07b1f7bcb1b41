use std::env;
use std::path::PathBuf;

use crate::error::{ArgusError, Result};

/// Runtime configuration, sourced from the environment.
///
/// The gateway, the bus and the processors all live in separate containers,
/// so every deployable knob arrives as an environment variable rather than a
/// config file. Processing parameters (confidence thresholds, polygons, …)
/// are NOT here: they live in the pipeline graphs users edit in the UI.
#[derive(Debug, Clone)]
pub struct Config {
    /// RabbitMQ connection parameters.
    pub rabbit_host: String,
    pub rabbit_port: u16,
    pub rabbit_user: String,
    pub rabbit_pass: String,
    /// Base URL of the CRUD gateway (required).
    pub api_gateway_url: String,
    /// Directory holding detection model files.
    pub models_path: PathBuf,
    /// Directory where event snapshots are written.
    pub media_path: PathBuf,
    /// Whether to request GPU execution for inference.
    pub use_gpu: bool,
    /// Soft per-frame processing deadline in seconds.
    pub max_processing_time: f64,
    /// Log performance stats every N processed frames.
    pub performance_log_interval: u64,
    /// Postgres URL for the events table (optional; events are skipped without it).
    pub events_db_url: Option<String>,
    /// Seconds a cached pipeline entry stays valid without an invalidation.
    pub pipeline_cache_ttl: u64,
    /// Port for the WebSocket broadcaster.
    pub ws_port: u16,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Build the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let api_gateway_url = env::var("API_GATEWAY_URL")
            .map_err(|_| ArgusError::Config("API_GATEWAY_URL environment variable not set".into()))?;

        let config = Config {
            rabbit_host: var_or("RABBITMQ_HOST", "localhost"),
            rabbit_port: var_or("RABBITMQ_PORT", "5672")
                .parse()
                .map_err(|_| ArgusError::Config("Invalid RABBITMQ_PORT".into()))?,
            rabbit_user: var_or("RABBITMQ_USER", "guest"),
            rabbit_pass: var_or("RABBITMQ_PASS", "guest"),
            api_gateway_url,
            models_path: PathBuf::from(var_or("MODELS_PATH", "models")),
            media_path: PathBuf::from(var_or("MEDIA_PATH", "media")),
            use_gpu: var_or("USE_GPU", "true").to_lowercase() == "true",
            max_processing_time: var_or("MAX_PROCESSING_TIME", "5.0")
                .parse()
                .map_err(|_| ArgusError::Config("Invalid MAX_PROCESSING_TIME".into()))?,
            performance_log_interval: var_or("PERFORMANCE_LOG_INTERVAL", "100")
                .parse()
                .map_err(|_| ArgusError::Config("Invalid PERFORMANCE_LOG_INTERVAL".into()))?,
            events_db_url: env::var("EVENTS_DB_URL").ok(),
            pipeline_cache_ttl: var_or("PIPELINE_CACHE_TTL", "300")
                .parse()
                .map_err(|_| ArgusError::Config("Invalid PIPELINE_CACHE_TTL".into()))?,
            ws_port: var_or("WS_PORT", "8090")
                .parse()
                .map_err(|_| ArgusError::Config("Invalid WS_PORT".into()))?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.api_gateway_url.trim().is_empty() {
            return Err(ArgusError::Config("API_GATEWAY_URL must not be empty".into()));
        }
        if self.max_processing_time <= 0.0 {
            return Err(ArgusError::Config("MAX_PROCESSING_TIME must be > 0".into()));
        }
        if self.performance_log_interval == 0 {
            return Err(ArgusError::Config("PERFORMANCE_LOG_INTERVAL must be > 0".into()));
        }
        Ok(())
    }

    /// AMQP connection string for the bus.
    pub fn amqp_addr(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/%2f",
            self.rabbit_user, self.rabbit_pass, self.rabbit_host, self.rabbit_port
        )
    }
}
