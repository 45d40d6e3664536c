use crate::encode::{JPEG_QUALITY, encode_jpeg};
use crate::sink::FramePacket;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use controller::MetricsSnapshot;
use schema::Detection;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WsMessage<'a> {
    Frame {
        frame_number: u64,
        width: u32,
        height: u32,
        detections: &'a [Detection],
        jpeg: String,
    },
    Metrics(MetricsSnapshot),
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Encode off the async workers; JPEG encoding is CPU-bound.
async fn frame_message(packet: FramePacket) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || {
        let jpeg = encode_jpeg(&packet.frame, JPEG_QUALITY)?;
        let message = WsMessage::Frame {
            frame_number: packet.frame.sequence(),
            width: packet.frame.width(),
            height: packet.frame.height(),
            detections: &packet.detections[..],
            jpeg: STANDARD.encode(jpeg),
        };
        Ok::<_, anyhow::Error>(serde_json::to_string(&message)?)
    })
    .await?
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    tracing::info!("New WebSocket connection established");

    let mut frames = state.frames.subscribe();
    let mut metrics = state.metrics.subscribe();

    loop {
        let text = tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket receive failed");
                    break;
                }
            },
            packet = frames.recv() => match packet {
                Ok(packet) => match frame_message(packet).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Frame encoding failed");
                        continue;
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "WebSocket client lagging, frames skipped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            changed = metrics.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *metrics.borrow_and_update();
                match serde_json::to_string(&WsMessage::Metrics(snapshot)) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Metrics serialization failed");
                        continue;
                    }
                }
            }
        };

        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }

    tracing::info!("WebSocket client disconnected");
}
