// WebSocket: push an aggregator snapshot after every slot transition

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::models::AggregatorSnapshot;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) async fn ws_snapshot(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let aggregator = state.aggregator.clone();
    ws.on_upgrade(move |socket| async move {
        // Subscribe before reading the current state so no transition is missed in between.
        let mut rx = aggregator.subscribe();
        let current = aggregator.snapshot().await;
        if let Err(e) = stream_snapshots(socket, &mut rx, current).await {
            tracing::info!("Snapshot stream error: {}", e);
        }
    })
}

/// False when the client is gone or too slow.
async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> anyhow::Result<bool> {
    let json = serde_json::to_string(value)?;
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(json.into()))).await;
    Ok(matches!(r, Ok(Ok(()))))
}

async fn stream_snapshots(
    mut socket: WebSocket,
    rx: &mut broadcast::Receiver<AggregatorSnapshot>,
    current: AggregatorSnapshot,
) -> anyhow::Result<()> {
    tracing::info!("Client connected to snapshot stream");
    if !send_json(&mut socket, &current).await? {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(snapshot) => {
                        if !send_json(&mut socket, &snapshot).await? {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/snapshot client lagged, skipped {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}
