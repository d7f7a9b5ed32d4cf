//! Dashboard WebSocket: forwards the event bus, applies host commands

use super::utils::send_json;
use crate::error::DropError;
use crate::hub::Hub;
use crate::protocol::{DashboardCommand, DashboardReply};
use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Handle a dashboard observer connection
pub async fn handle_dashboard_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = hub.dashboard().subscribe();

    tracing::info!("Dashboard observer connected");

    for event in hub.dashboard_snapshot().await {
        if !send_json(&mut sender, &event).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !send_json(&mut sender, &event).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dashboard observer lagged, {} events dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_command(&hub, text.as_str()).await {
                            if !send_json(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!("Dashboard WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::info!("Dashboard observer disconnected");
}

/// Apply one dashboard command. Returns the reply meant only for its sender.
///
/// Successful renames and directory changes answer through the event bus
/// instead, so every observer sees them.
pub async fn handle_command(hub: &Hub, text: &str) -> Option<DashboardReply> {
    let command = match serde_json::from_str::<DashboardCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            return Some(DashboardReply::Error {
                message: format!("Malformed command: {}", e),
            });
        }
    };

    match command {
        DashboardCommand::ChangeServerName { name } => hub
            .dashboard()
            .change_display_name(&name)
            .await
            .err()
            .map(|e| DashboardReply::Error {
                message: e.client_message(),
            }),
        DashboardCommand::ChangePin { pin } => Some(match hub.dashboard().change_pin(&pin).await {
            Ok(change) => DashboardReply::PinUpdated {
                pin: change.pin,
                display_url: change.link.display_url,
                qr_code: change.link.qr_code,
            },
            Err(e) => DashboardReply::PinUpdateFailed {
                message: e.client_message(),
            },
        }),
        DashboardCommand::ChangeUploadDirectory { path } => {
            match hub.dashboard().change_upload_root(&path).await {
                Ok(_) => None,
                Err(DropError::Validation(message)) => {
                    Some(DashboardReply::UploadDirectoryUpdateFailed { message })
                }
                Err(e) => {
                    tracing::error!("Error changing upload directory to {}: {}", path, e);
                    Some(DashboardReply::UploadDirectoryUpdateFailed {
                        message: "Failed to set directory. Check permissions.".to_string(),
                    })
                }
            }
        }
    }
}
