//! Error type shared by the hub components.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, DropError>;

#[derive(Debug, Error)]
pub enum DropError {
    /// Bad token or PIN. Never says which of the two was wrong.
    #[error("Authentication failed")]
    Auth,

    /// Destination directory or file could not be prepared
    #[error("Failed to create directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure while a transfer was in progress
    #[error("Server file write error: {0}")]
    Write(#[source] std::io::Error),

    #[error("Transfer not found: {0}")]
    UnknownTransfer(Uuid),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DropError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Message safe to hand back to a remote peer.
    ///
    /// Directory errors keep the host path to themselves.
    pub fn client_message(&self) -> String {
        match self {
            Self::Directory { .. } => "Failed to create directory.".to_string(),
            Self::UnknownTransfer(_) => "Transfer not found".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_error_hides_path() {
        let err = DropError::Directory {
            path: PathBuf::from("/secret/place"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.client_message(), "Failed to create directory.");
        assert!(err.to_string().contains("/secret/place"));
    }
}
