// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! WebSocket broadcaster.
//!
//! One consumer drains the `websocket_events` queue and forwards each body
//! verbatim to every connected client. Clients connect to `/ws/events` with
//! a `token` query parameter; a missing token is rejected with the
//! policy-violation close code. A failed send drops that client from the
//! active set.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::bus::{self, Bus};
use crate::config::Config;
use crate::error::Result;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Registry of connected clients.
#[derive(Default)]
pub struct Broadcaster {
    clients: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.lock();
        clients.push(tx);
        info!(total = clients.len(), "WebSocket client connected");
        rx
    }

    /// Push `message` to every live client, dropping the dead ones.
    pub fn broadcast(&self, message: &str) {
        let mut clients = self.clients.lock();
        clients.retain(|tx| tx.send(message.to_string()).is_ok());
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

#[derive(Deserialize)]
struct WsParams {
    #[serde(default)]
    token: String,
}

/// Build the broadcaster router.
pub fn build_router(broadcaster: Arc<Broadcaster>) -> Router {
    Router::new()
        .route("/ws/events", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(broadcaster)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(broadcaster): State<Arc<Broadcaster>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.token, broadcaster))
}

async fn handle_socket(mut socket: WebSocket, token: String, broadcaster: Arc<Broadcaster>) {
    // Token validation is the gateway's business; an absent token is an
    // unauthenticated client and is turned away.
    if token.trim().is_empty() {
        warn!("WebSocket auth failed, closing with policy violation");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "authentication required".into(),
            })))
            .await;
        return;
    }

    let mut rx = broadcaster.register();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(message) = outgoing else { break };
                if sender.send(Message::Text(message.into())).await.is_err() {
                    // Send failure: drop this client; the registry prunes
                    // the closed channel on the next broadcast.
                    break;
                }
            }
            incoming = receiver.next() => {
                // Clients only talk to keep the connection alive; any close
                // or error ends the session.
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
    info!("WebSocket client disconnected");
}

/// Serve the WebSocket endpoint.
pub async fn start_server(broadcaster: Arc<Broadcaster>, port: u16) -> Result<()> {
    let app = build_router(broadcaster);
    let addr = format!("0.0.0.0:{port}");
    info!(port, "WebSocket broadcaster listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Drain `websocket_events` into the broadcaster, forever.
pub async fn run_fanout_consumer(config: Config, broadcaster: Arc<Broadcaster>) {
    loop {
        let bus = Bus::connect(&config.amqp_addr()).await;
        match fanout_loop(&bus, &broadcaster).await {
            Ok(()) => warn!("WebSocket event stream ended, reconnecting"),
            Err(e) => error!(error = %e, "WebSocket event consumer failed, reconnecting"),
        }
        sleep(RECONNECT_DELAY).await;
    }
}

async fn fanout_loop(bus: &Bus, broadcaster: &Broadcaster) -> Result<()> {
    let channel = bus.channel().await?;
    let mut consumer = bus::websocket_consumer(&channel, "ws-broadcaster").await?;
    info!("Listening on the websocket event queue");

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery?;
        match String::from_utf8(delivery.data) {
            Ok(body) => broadcaster.broadcast(&body),
            Err(e) => warn!(error = %e, "Dropping non-UTF8 websocket event"),
        }
    }
    Ok(())
}
