//! WebSocket endpoint bridging sockets to the hub.
//!
//! Each connection runs a [`SocketSession`] for inbound frames and a
//! forwarding task that copies hub broadcasts to the socket, dropping
//! messages whose rooms the connection has not joined.
//!
//! [`SocketSession`]: clinsync_realtime::SocketSession

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use clinsync_core::defaults::WS_PING_INTERVAL_SECS;
use clinsync_realtime::SocketSession;

use crate::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session = Arc::new(SocketSession::new(
        state.registry.clone(),
        state.hub.clone(),
        state.roles.clone(),
        state.reports.clone(),
        state.notifications.clone(),
    ));
    session.connect().await;
    let conn_id = session.id();
    let active = state.registry.connection_count().await;
    info!(
        connection = %conn_id,
        active,
        "WebSocket connection opened"
    );

    let (mut sender, mut receiver) = socket.split();
    let mut hub_rx = state.hub.subscribe();
    let registry = state.registry.clone();

    // Forward room-targeted hub messages to this socket.
    let send_task = tokio::spawn(async move {
        let mut ping_interval =
            tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        loop {
            tokio::select! {
                message = hub_rx.recv() => {
                    match message {
                        Ok(message) => {
                            if !registry.should_deliver(conn_id, &message).await {
                                continue;
                            }
                            let frame = message.to_frame();
                            let text = match serde_json::to_string(&frame) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!(error = %e, event = %frame.event, "Unserializable frame");
                                    continue;
                                }
                            };
                            if sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(connection = %conn_id, missed = n, "WebSocket client lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Feed inbound frames to the session.
    let recv_session = session.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => recv_session.handle_frame(&text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either side to finish
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    session.disconnect().await;
    let active = state.registry.connection_count().await;
    info!(
        connection = %conn_id,
        active,
        "WebSocket connection closed"
    );
}
