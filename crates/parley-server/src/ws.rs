use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use parley_core::ids::ConnectionId;
use parley_engine::ConnectionRegistry;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Drive one WebSocket connection: split into writer/reader, ping on an
/// interval, track pongs for liveness, and unregister on any exit path.
pub async fn handle_ws_connection(
    socket: WebSocket,
    connection_id: ConnectionId,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<ConnectionRegistry>,
    on_message: mpsc::Sender<(ConnectionId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drain the outbound queue and ping periodically.
    let writer_cid = connection_id.clone();
    let writer_registry = Arc::clone(&registry);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "sent ping");
                }
            }
        }
        writer_registry.mark_disconnected(&writer_cid);
    });

    // Reader: forward request frames to the processor, record pongs.
    let reader_cid = connection_id.clone();
    let reader_registry = Arc::clone(&registry);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Pong(_) => {
                    reader_registry.record_pong(&reader_cid);
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pongs itself
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    registry.unregister(&connection_id);
    tracing::info!(connection_id = %connection_id, "websocket disconnected");
}
