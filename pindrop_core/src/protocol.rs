//! Wire messages for the device and dashboard channels.
//!
//! Every message is a JSON object tagged by `type`. Chunk payloads may also
//! travel as binary frames, see [`encode_chunk_frame`].

use crate::transfer::TransferId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the transfer id prefix on binary chunk frames
pub const CHUNK_FRAME_HEADER_LEN: usize = 16;

/// Messages from a device to the host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Register {
        device_id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
    },
    ChangeClientName {
        device_id: String,
        name: String,
    },
    StartUpload {
        relative_path: String,
        size: u64,
        /// Echoed back so a client can match the reply to its request
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    UploadChunk {
        transfer_id: TransferId,
        chunk: Vec<u8>,
    },
    EndUpload {
        transfer_id: TransferId,
    },
    CancelUpload {
        transfer_id: TransferId,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    Success,
    Error,
}

/// Messages from the host to a device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccessful,
    AuthFailed,
    ServerInfo {
        name: String,
    },
    ServerNameUpdated {
        name: String,
    },
    UploadStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transfer_id: Option<TransferId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ChunkAck {
        transfer_id: TransferId,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ClientProgress {
        transfer_id: TransferId,
        received: u64,
        total: u64,
    },
    TransferComplete {
        transfer_id: TransferId,
        filename: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn upload_started(request_id: Option<String>, transfer_id: TransferId) -> Self {
        Self::UploadStarted {
            request_id,
            status: Status::Success,
            transfer_id: Some(transfer_id),
            message: None,
        }
    }

    pub fn upload_failed(request_id: Option<String>, message: String) -> Self {
        Self::UploadStarted {
            request_id,
            status: Status::Error,
            transfer_id: None,
            message: Some(message),
        }
    }

    pub fn chunk_ok(transfer_id: TransferId) -> Self {
        Self::ChunkAck {
            transfer_id,
            status: Status::Ok,
            message: None,
        }
    }

    pub fn chunk_failed(transfer_id: TransferId, message: String) -> Self {
        Self::ChunkAck {
            transfer_id,
            status: Status::Error,
            message: Some(message),
        }
    }
}

/// Host configuration commands sent by a dashboard observer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardCommand {
    ChangeServerName { name: String },
    ChangePin { pin: String },
    ChangeUploadDirectory { path: String },
}

/// Replies addressed only to the dashboard observer that sent a command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardReply {
    PinUpdated {
        pin: String,
        display_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        qr_code: Option<String>,
    },
    PinUpdateFailed {
        message: String,
    },
    UploadDirectoryUpdateFailed {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Build a binary chunk frame: 16-byte transfer id followed by the payload
pub fn encode_chunk_frame(transfer_id: TransferId, chunk: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(CHUNK_FRAME_HEADER_LEN + chunk.len());
    frame.extend_from_slice(transfer_id.as_bytes());
    frame.extend_from_slice(chunk);
    frame
}

/// Split a binary chunk frame into transfer id and payload
pub fn decode_chunk_frame(frame: &[u8]) -> Option<(TransferId, &[u8])> {
    if frame.len() < CHUNK_FRAME_HEADER_LEN {
        return None;
    }
    let (header, payload) = frame.split_at(CHUNK_FRAME_HEADER_LEN);
    let id = Uuid::from_slice(header).ok()?;
    Some((id, payload))
}
