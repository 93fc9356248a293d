use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use kindred_core::Services;
use kindred_types::api::Claims;
use kindred_types::events::{ErrorCode, GatewayCommand, GatewayEvent};

use crate::commands::handle_command;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one WebSocket from the Identify handshake to disconnect.
pub async fn handle_connection(socket: WebSocket, services: Services, jwt_secret: Arc<str>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(user_id) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id }).await {
        return;
    }

    let (conn_id, mut user_rx) = services.presence.register(user_id).await;
    info!(%user_id, %conn_id, "Connected to gateway");

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = user_rx.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= MAX_MISSED_PONGS {
                            warn!(%user_id, missed_heartbeats, "Heartbeat timeout, dropping");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_services = services.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_services, user_id, conn_id, cmd).await,
                    Err(e) => {
                        warn!(
                            %user_id,
                            "Bad command: {} -- raw: {}",
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let event = GatewayEvent::CommandError {
                            command: "Unknown".to_string(),
                            code: ErrorCode::Validation,
                            reason: format!("malformed command: {e}"),
                            temp_id: None,
                            message_id: None,
                        };
                        recv_services.presence.send_to_connection(user_id, conn_id, event).await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    services.presence.unregister(user_id, conn_id).await;
    info!(%user_id, %conn_id, "Disconnected from gateway");
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(text.into())).await.is_ok()
}

/// The first frame must be `Identify` with a valid token. Anything else
/// before it is ignored until the timeout.
async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Uuid> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else {
                continue;
            };
            let parsed = serde_json::from_str::<GatewayCommand>(&text);
            let Ok(GatewayCommand::Identify { token }) = parsed else {
                debug!("Ignoring frame before Identify");
                continue;
            };
            return match decode::<Claims>(
                &token,
                &DecodingKey::from_secret(jwt_secret.as_bytes()),
                &Validation::default(),
            ) {
                Ok(data) => Some(data.claims.sub),
                Err(e) => {
                    warn!("Identify with invalid token: {}", e);
                    None
                }
            };
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}
