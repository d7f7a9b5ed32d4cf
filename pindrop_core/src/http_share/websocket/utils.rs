//! WebSocket utility functions

use axum::extract::ws::{Message, WebSocket};
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use serde::Serialize;

/// Serialize a message into a text frame
pub fn to_text_frame<T: Serialize>(msg: &T) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::error!("Failed to serialize outgoing message: {}", e);
            None
        }
    }
}

/// Send one JSON message. Returns false once the socket is unusable.
pub async fn send_json<T: Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &T,
) -> bool {
    match to_text_frame(msg) {
        Some(frame) => sender.send(frame).await.is_ok(),
        None => true,
    }
}
