//! Device WebSocket connection handler

use super::utils::to_text_frame;
use crate::connection::ConnectionId;
use crate::error::DropError;
use crate::hub::Hub;
use crate::protocol::{ClientMessage, ServerMessage, decode_chunk_frame};
use crate::transfer::TransferId;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Ping interval for keeping WebSocket connection alive (5 seconds)
/// Mobile browsers may have stricter timeouts, so we ping more frequently
const PING_INTERVAL_SECS: u64 = 5;

/// Handle a device WebSocket connection
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, client_ip: String) {
    let (sender, mut receiver) = socket.split();
    let (conn, outbound) = hub.connect().await;

    tracing::info!("WebSocket connection {} established from: {}", conn, client_ip);

    let writer = tokio::spawn(write_outbound(sender, outbound));
    let mut session = DeviceSession {
        hub: hub.clone(),
        conn,
        device_id: None,
    };

    // Messages are handled one at a time, so a chunk is fully written and
    // acked before the next frame from this device is even read.
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => session.on_text(text.as_str()).await,
            Ok(Message::Binary(data)) => session.on_binary(&data).await,
            Ok(Message::Close(_)) => {
                tracing::info!("Client closed WebSocket connection {}", conn);
                break;
            }
            Ok(_) => {
                // Ping/Pong are answered by axum
            }
            Err(e) => {
                tracing::warn!("WebSocket error on {}: {}", conn, e);
                break;
            }
        }
    }

    hub.disconnect(conn).await;
    let _ = writer.await;
    tracing::info!("WebSocket connection {} from {} closed", conn, client_ip);
}

/// Forward queued messages to the socket, pinging while idle
async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
) {
    let mut ping_interval =
        tokio::time::interval(tokio::time::Duration::from_secs(PING_INTERVAL_SECS));
    ping_interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if let Err(e) = sender.send(Message::Ping(bytes::Bytes::new())).await {
                    tracing::warn!("Failed to send ping: {}", e);
                    break;
                }
            }
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                };
                let Some(frame) = to_text_frame(&msg) else {
                    continue;
                };
                if let Err(e) = sender.send(frame).await {
                    tracing::warn!("Failed to send message: {}", e);
                    break;
                }
            }
        }
    }

    // Socket is gone; keep draining so senders never block on a full queue
    while outbound.recv().await.is_some() {}
}

struct DeviceSession {
    hub: Arc<Hub>,
    conn: ConnectionId,
    /// Set once this connection has registered successfully
    device_id: Option<String>,
}

impl DeviceSession {
    async fn reply(&self, msg: ServerMessage) {
        self.hub.send_to(self.conn, msg).await;
    }

    async fn reply_error(&self, message: impl Into<String>) {
        self.reply(ServerMessage::Error {
            message: message.into(),
        })
        .await;
    }

    async fn on_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => {
                tracing::warn!("Malformed message on {}: {}", self.conn, e);
                self.reply_error(format!("Malformed message: {}", e)).await;
            }
        }
    }

    async fn on_binary(&mut self, frame: &[u8]) {
        if self.device_id.is_none() {
            self.reply_error("Not authenticated").await;
            return;
        }
        match decode_chunk_frame(frame) {
            Some((transfer_id, payload)) => self.upload_chunk(transfer_id, payload).await,
            None => self.reply_error("Malformed chunk frame").await,
        }
    }

    async fn dispatch(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Register {
                device_id,
                name,
                token,
                pin,
            } => {
                self.register(&device_id, &name, token.as_deref(), pin.as_deref())
                    .await
            }
            _ if self.device_id.is_none() => {
                tracing::warn!("Rejecting message from unregistered {}", self.conn);
                self.reply_error("Not authenticated").await;
            }
            ClientMessage::ChangeClientName { device_id, name } => {
                if let Err(e) = self.hub.rename_device(&device_id, &name).await {
                    self.reply_error(e.client_message()).await;
                }
            }
            ClientMessage::StartUpload {
                relative_path,
                size,
                request_id,
            } => {
                tracing::info!(
                    "Received start_upload for '{}' on {}",
                    relative_path,
                    self.conn
                );
                let reply = match self
                    .hub
                    .transfers()
                    .start_transfer(self.conn, &relative_path, size)
                    .await
                {
                    Ok(transfer_id) => ServerMessage::upload_started(request_id, transfer_id),
                    Err(e) => {
                        tracing::error!("Cannot start transfer for '{}': {}", relative_path, e);
                        ServerMessage::upload_failed(request_id, e.client_message())
                    }
                };
                self.reply(reply).await;
            }
            ClientMessage::UploadChunk { transfer_id, chunk } => {
                self.upload_chunk(transfer_id, &chunk).await
            }
            ClientMessage::EndUpload { transfer_id } => {
                if let Err(e) = self
                    .hub
                    .transfers()
                    .end_transfer(self.conn, transfer_id)
                    .await
                {
                    self.reply_error(e.client_message()).await;
                }
            }
            ClientMessage::CancelUpload { transfer_id } => {
                self.hub.transfers().cancel_transfer(transfer_id).await;
            }
        }
    }

    async fn register(&mut self, device_id: &str, name: &str, token: Option<&str>, pin: Option<&str>) {
        match self
            .hub
            .register(self.conn, device_id, name, token, pin)
            .await
        {
            Ok(server_name) => {
                self.device_id = Some(device_id.trim().to_string());
                self.reply(ServerMessage::AuthSuccessful).await;
                self.reply(ServerMessage::ServerInfo { name: server_name })
                    .await;
            }
            Err(DropError::Auth) => self.reply(ServerMessage::AuthFailed).await,
            Err(e) => self.reply_error(e.client_message()).await,
        }
    }

    async fn upload_chunk(&self, transfer_id: TransferId, chunk: &[u8]) {
        let reply = match self
            .hub
            .transfers()
            .write_chunk(self.conn, transfer_id, chunk)
            .await
        {
            Ok(_) => ServerMessage::chunk_ok(transfer_id),
            Err(e) => {
                if matches!(e, DropError::UnknownTransfer(_)) {
                    tracing::warn!("Received chunk for unknown transfer_id: {}", transfer_id);
                }
                ServerMessage::chunk_failed(transfer_id, e.client_message())
            }
        };
        self.reply(reply).await;
    }
}
