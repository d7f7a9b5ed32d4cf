//! Dashboard channel: lifecycle mirror for observers plus host settings.
//!
//! Every device and transfer event is published on a broadcast bus. Observers
//! that fall behind lose old events rather than slowing the hub down.

use crate::auth::AuthGate;
use crate::config::HostSettings;
use crate::connection::ConnectionTable;
use crate::error::{DropError, Result};
use crate::link::{ConnectionLink, LinkRenderer};
use crate::protocol::ServerMessage;
use crate::transfer::TransferId;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of the broadcast bus per observer
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Events mirrored to dashboard observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardEvent {
    ClientConnected,
    ClientDisconnected,
    ClientUpdate {
        clients: Vec<String>,
    },
    TransferStarted {
        transfer_id: TransferId,
        file_name: String,
    },
    TransferProgress {
        transfer_id: TransferId,
        received: u64,
        total: u64,
    },
    TransferComplete {
        transfer_id: TransferId,
        file_name: String,
    },
    TransferCancelled {
        transfer_id: TransferId,
        file_name: String,
    },
    TransferFailed {
        transfer_id: TransferId,
        file_name: String,
        message: String,
    },
    ServerNameUpdated {
        name: String,
    },
    UploadDirectoryUpdated {
        path: String,
    },
}

/// Sending half of the dashboard broadcast
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DashboardEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Having no observers is not an error.
    pub fn emit(&self, event: DashboardEvent) {
        tracing::debug!("Dashboard event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }
}

/// New PIN plus the link that now carries the rotated token
#[derive(Debug, Clone)]
pub struct PinChange {
    pub pin: String,
    pub link: ConnectionLink,
}

pub struct DashboardChannel {
    bus: EventBus,
    auth: Arc<AuthGate>,
    settings: Arc<HostSettings>,
    connections: Arc<ConnectionTable>,
    links: Arc<dyn LinkRenderer>,
}

impl DashboardChannel {
    pub fn new(
        bus: EventBus,
        auth: Arc<AuthGate>,
        settings: Arc<HostSettings>,
        connections: Arc<ConnectionTable>,
        links: Arc<dyn LinkRenderer>,
    ) -> Self {
        Self {
            bus,
            auth,
            settings,
            connections,
            links,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.bus.subscribe()
    }

    /// Link for the current token
    pub async fn current_link(&self) -> ConnectionLink {
        self.links.render(&self.auth.token().await)
    }

    pub fn dashboard_url(&self) -> String {
        self.links.dashboard_url()
    }

    /// Rename the host and tell observers and every open device connection.
    pub async fn change_display_name(&self, new_name: &str) -> Result<()> {
        let name = new_name.trim();
        if name.is_empty() {
            return Err(DropError::validation("Server name must not be empty."));
        }

        self.settings.set_server_name(name.to_string()).await;
        tracing::info!("Server name changed to: {}", name);

        self.bus.emit(DashboardEvent::ServerNameUpdated {
            name: name.to_string(),
        });
        self.connections
            .broadcast(ServerMessage::ServerNameUpdated {
                name: name.to_string(),
            })
            .await;
        Ok(())
    }

    /// Set a new PIN. Rotates the token, so previously shared links die.
    pub async fn change_pin(&self, new_pin: &str) -> Result<PinChange> {
        let credentials = self.auth.change_pin(new_pin).await?;
        let link = self.links.render(&credentials.token);
        Ok(PinChange {
            pin: credentials.pin,
            link,
        })
    }

    /// Switch the upload root after proving it is writable.
    ///
    /// On any failure the previous root stays in place.
    pub async fn change_upload_root(&self, new_path: &str) -> Result<PathBuf> {
        let trimmed = new_path.trim();
        if trimmed.is_empty() {
            return Err(DropError::validation("Upload directory must not be empty."));
        }

        let resolved = std::path::absolute(trimmed)
            .map(|path| normalize(&path))
            .map_err(|e| DropError::Directory {
                path: PathBuf::from(trimmed),
                source: e,
            })?;
        probe_writable(&resolved).await?;

        self.settings.set_upload_root(resolved.clone()).await;
        tracing::info!("Upload folder changed to: {:?}", resolved);

        self.bus.emit(DashboardEvent::UploadDirectoryUpdated {
            path: resolved.to_string_lossy().to_string(),
        });
        Ok(resolved)
    }
}

/// Fold `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Create `dir` if needed, then create and delete a throwaway marker in it
async fn probe_writable(dir: &Path) -> Result<()> {
    let directory_error = |source| DropError::Directory {
        path: dir.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(dir).await.map_err(directory_error)?;

    let marker = dir.join(format!("_test_write_{}", Uuid::new_v4().simple()));
    tokio::fs::write(&marker, b"test")
        .await
        .map_err(directory_error)?;
    tokio::fs::remove_file(&marker)
        .await
        .map_err(directory_error)?;
    Ok(())
}
