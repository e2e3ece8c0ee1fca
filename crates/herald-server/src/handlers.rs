//! Connection handlers for the Herald server.
//!
//! This module handles the connection lifecycle and frame processing.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use herald_core::message::{reasons, JoinRequest, OutboundEvent};
use herald_core::{ChannelCoordinator, ConnectionId, LocalDirectory};
use herald_protocol::{codec, Frame, ProtocolError};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Connection registry and rooms.
    pub directory: Arc<LocalDirectory>,
    /// Channel coordination.
    pub coordinator: Arc<ChannelCoordinator>,
    /// Server configuration.
    pub config: Config,
}

/// Encoding a connection last spoke in; replies follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wire {
    Text,
    Binary,
}

impl Wire {
    fn encode(self, frame: &Frame) -> Result<Message, ProtocolError> {
        Ok(match self {
            Wire::Text => Message::Text(codec::encode(frame)?),
            Wire::Binary => Message::Binary(codec::encode_binary(frame)?.to_vec()),
        })
    }
}

type WsSender = SplitSink<WebSocket, Message>;

/// Decoded frames waiting for the connection's frame worker.
const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let config = &state.config;

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;

    info!("Herald server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, state.config.websocket_path);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.directory.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "channels": stats.room_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let connection_id = ConnectionId::generate();

    let mut outbound = match state.directory.register(connection_id.clone()) {
        Ok(rx) => rx,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Connection refused");
            metrics::record_error("register");
            return;
        }
    };

    debug!(connection = %connection_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut wire = Wire::Text;

    if send_frame(&mut sender, wire, &Frame::connected(connection_id.as_str()))
        .await
        .is_err()
    {
        error!(connection = %connection_id, "Failed to send Connected frame");
        state.directory.unregister(&connection_id);
        return;
    }

    let (requests, requests_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
    let (replies_tx, mut replies) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
    let worker = tokio::spawn(process_frames(
        state.clone(),
        connection_id.clone(),
        requests_rx,
        replies_tx,
    ));

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            Some(event) = outbound.recv() => {
                if send_frame(&mut sender, wire, &event_frame(event)).await.is_err() {
                    break;
                }
            }

            Some(reply) = replies.recv() => {
                if send_frame(&mut sender, wire, &reply).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                let mut frames = Vec::new();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        wire = Wire::Text;
                        frames.push(codec::decode(&text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        wire = Wire::Binary;
                        read_buffer.extend_from_slice(&data);
                        loop {
                            match codec::decode_from(&mut read_buffer) {
                                Ok(Some(frame)) => frames.push(Ok(frame)),
                                Ok(None) => break,
                                Err(e) => {
                                    read_buffer.clear();
                                    frames.push(Err(e));
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }

                let mut closed = false;
                for decoded in frames {
                    match decoded {
                        Ok(frame) => {
                            if requests.send(frame).await.is_err() {
                                closed = true;
                            }
                        }
                        Err(e) => {
                            debug!(connection = %connection_id, error = %e, "Undecodable frame");
                            metrics::record_error("protocol");
                            let reply = Frame::error(e.code(), e.to_string());
                            if send_frame(&mut sender, wire, &reply).await.is_err() {
                                closed = true;
                            }
                        }
                    }
                    if closed {
                        break;
                    }
                }
                if closed {
                    break;
                }
            }
        }
    }

    // Let in-flight joins settle before leaving everything
    drop(requests);
    drop(replies);
    if let Err(e) = worker.await {
        error!(connection = %connection_id, error = %e, "Frame worker failed");
    }

    state.coordinator.disconnect(&connection_id).await;
    state.directory.unregister(&connection_id);
    metrics::set_active_channels(state.directory.stats().room_count);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Apply a connection's frames in arrival order.
///
/// Runs beside the socket loop so that a join waiting on authorization does
/// not stop the outbound queue from draining. Direct replies go back through
/// `replies`.
async fn process_frames(
    state: Arc<AppState>,
    connection_id: ConnectionId,
    mut requests: mpsc::Receiver<Frame>,
    replies: mpsc::Sender<Frame>,
) {
    while let Some(frame) = requests.recv().await {
        if let Some(reply) = handle_frame(frame, &connection_id, &state).await {
            if replies.send(reply).await.is_err() {
                break;
            }
        }
    }
}

/// Handle a decoded frame, returning the direct reply if there is one.
///
/// Join and leave results reach the client through its outbound queue.
async fn handle_frame(frame: Frame, connection_id: &ConnectionId, state: &AppState) -> Option<Frame> {
    match frame {
        Frame::Subscribe { channel, auth } => {
            debug!(connection = %connection_id, channel = %channel, "Subscribe request");

            let request = JoinRequest {
                channel: Some(channel),
                auth,
            };
            let start = Instant::now();
            match state.coordinator.join(connection_id, &request).await {
                Ok(outcome) => metrics::record_join(&outcome, start.elapsed().as_secs_f64()),
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Join failed");
                    metrics::record_error("join");
                }
            }
            metrics::set_active_channels(state.directory.stats().room_count);
            None
        }

        Frame::Unsubscribe { channel } => {
            debug!(connection = %connection_id, channel = %channel, "Unsubscribe request");

            if let Err(e) = state
                .coordinator
                .leave(connection_id, &channel, reasons::UNSUBSCRIBED)
                .await
            {
                warn!(connection = %connection_id, error = %e, "Leave incomplete");
                metrics::record_error("leave");
            }
            metrics::set_active_channels(state.directory.stats().room_count);
            None
        }

        Frame::ClientEvent { body } => {
            let relayed = state
                .coordinator
                .client_event(connection_id, body.into_value())
                .await;
            metrics::record_client_event(relayed);
            None
        }

        Frame::Ping => Some(Frame::Pong),

        other => {
            warn!(connection = %connection_id, frame_type = other.kind(), "Unexpected frame type");
            Some(Frame::error(400, format!("unexpected frame type {}", other.kind())))
        }
    }
}

fn event_frame(event: OutboundEvent) -> Frame {
    Frame::event(event.event, event.channel, event.data)
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut WsSender, wire: Wire, frame: &Frame) -> Result<()> {
    let message = wire.encode(frame)?;
    sender.send(message).await?;
    Ok(())
}
