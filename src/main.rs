// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! argus — distributed video analytics pipeline engine
//!
//! Usage:
//!   argus ingest      # camera supervisor + capture workers
//!   argus process     # frame-processing consumer (DAG executor)
//!   argus broadcast   # WebSocket event broadcaster

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use argus::api::ApiClient;
use argus::bus::{self, AmqpPublisher, Bus};
use argus::config::Config;
use argus::events::{EventSink, EventStore, PgEventStore};
use argus::models::ModelRegistry;
use argus::nodes::face::FaceEmbedder;
use argus::pipeline::cache::PipelineCache;
use argus::pipeline::executor::PipelineExecutor;
use argus::processor::ProcessorService;
use argus::source::RtspSourceFactory;
use argus::supervisor::CameraSupervisor;
use argus::track::TrackerConfig;
use argus::ws::{self, Broadcaster};

#[derive(Parser)]
#[command(name = "argus", about = "Distributed video analytics pipeline engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the camera supervisor and its capture workers.
    Ingest,
    /// Run the frame-processing consumer.
    Process,
    /// Run the WebSocket event broadcaster.
    Broadcast,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Ingest => run_ingest(config).await,
        Command::Process => run_process(config).await,
        Command::Broadcast => run_broadcast(config).await,
    }
}

async fn run_ingest(config: Config) {
    info!(gateway = config.api_gateway_url, "Starting camera ingestion service");

    let bus = Bus::connect(&config.amqp_addr()).await;
    let channel = match bus.channel().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to open bus channel");
            std::process::exit(1);
        }
    };

    let api = Arc::new(ApiClient::new(config.api_gateway_url.clone()));
    let publisher = Arc::new(AmqpPublisher::new(channel));
    let mut supervisor = CameraSupervisor::new(api, publisher, Arc::new(RtspSourceFactory));

    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Signal error");
            }
            info!("Received CTRL+C, shutting down");
        }
    }
    supervisor.shutdown().await;
}

async fn run_process(config: Config) {
    info!(gateway = config.api_gateway_url, "Starting frame processing service");

    let api = Arc::new(ApiClient::new(config.api_gateway_url.clone()));
    let cache = Arc::new(PipelineCache::new(
        api.clone(),
        Duration::from_secs(config.pipeline_cache_ttl),
    ));
    let models = Arc::new(ModelRegistry::new(config.models_path.clone(), config.use_gpu));
    let embedder = Arc::new(FaceEmbedder::load(&config.models_path));

    let store: Option<Arc<dyn EventStore>> = match &config.events_db_url {
        Some(url) => match PgEventStore::connect(url).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                error!(error = %e, "Events database unavailable, events will not be persisted");
                None
            }
        },
        None => {
            info!("EVENTS_DB_URL not set, events will not be persisted");
            None
        }
    };

    let bus = Bus::connect(&config.amqp_addr()).await;
    let publisher = match bus.channel().await {
        Ok(channel) => Some(Arc::new(AmqpPublisher::new(channel))),
        Err(e) => {
            error!(error = %e, "Failed to open publish channel, notifications disabled");
            None
        }
    };

    let sink = Arc::new(EventSink::new(
        store,
        publisher.clone().map(|p| p as Arc<dyn argus::bus::BusPublisher>),
        config.media_path.clone(),
    ));

    let executor = Arc::new(PipelineExecutor::new(
        cache.clone(),
        models,
        sink,
        api,
        embedder,
        publisher.map(|p| p as Arc<dyn argus::bus::BusPublisher>),
        TrackerConfig { models_path: Some(config.models_path.clone()), ..Default::default() },
        config.max_processing_time,
    ));

    // Cache invalidation listens on its own long-lived subscriber.
    tokio::spawn(bus::run_invalidation_listener(config.amqp_addr(), cache));

    let mut service = ProcessorService::new(config, executor);
    tokio::select! {
        _ = service.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Signal error");
            }
            info!("Received CTRL+C, shutting down");
        }
    }
    service.log_stats();
}

async fn run_broadcast(config: Config) {
    info!(port = config.ws_port, "Starting WebSocket broadcaster");

    let broadcaster = Arc::new(Broadcaster::new());
    tokio::spawn(ws::run_fanout_consumer(config.clone(), broadcaster.clone()));

    tokio::select! {
        result = ws::start_server(broadcaster, config.ws_port) => {
            if let Err(e) = result {
                error!(error = %e, "WebSocket server failed");
                std::process::exit(1);
            }
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Signal error");
            }
            info!("Received CTRL+C, shutting down");
        }
    }
}
