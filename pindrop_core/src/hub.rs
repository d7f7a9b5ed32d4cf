//! The hub owns every piece of process-wide state and is the only way in.
//!
//! Protocol handlers hold an `Arc<Hub>` and call the operations below; the
//! registries themselves are never handed out for direct mutation.

use crate::auth::AuthGate;
use crate::config::HostSettings;
use crate::connection::{ConnectionId, ConnectionTable};
use crate::dashboard::{DashboardChannel, DashboardEvent, EventBus};
use crate::error::{DropError, Result};
use crate::link::LinkRenderer;
use crate::opener::PathOpener;
use crate::protocol::ServerMessage;
use crate::registry::DeviceRegistry;
use crate::transfer::TransferManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Hub {
    auth: Arc<AuthGate>,
    settings: Arc<HostSettings>,
    connections: Arc<ConnectionTable>,
    registry: Arc<DeviceRegistry>,
    transfers: TransferManager,
    dashboard: DashboardChannel,
    opener: Arc<dyn PathOpener>,
}

impl Hub {
    pub fn new(
        settings: HostSettings,
        auth: AuthGate,
        links: Arc<dyn LinkRenderer>,
        opener: Arc<dyn PathOpener>,
    ) -> Self {
        let bus = EventBus::default();
        let auth = Arc::new(auth);
        let settings = Arc::new(settings);
        let connections = Arc::new(ConnectionTable::new());
        let registry = Arc::new(DeviceRegistry::new(bus.clone()));
        let transfers = TransferManager::new(
            registry.clone(),
            settings.clone(),
            connections.clone(),
            bus.clone(),
        );
        let dashboard = DashboardChannel::new(
            bus,
            auth.clone(),
            settings.clone(),
            connections.clone(),
            links,
        );

        Self {
            auth,
            settings,
            connections,
            registry,
            transfers,
            dashboard,
            opener,
        }
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn transfers(&self) -> &TransferManager {
        &self.transfers
    }

    pub fn dashboard(&self) -> &DashboardChannel {
        &self.dashboard
    }

    /// Open a device connection; the receiver carries everything sent to it.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        self.connections.open().await
    }

    pub async fn send_to(&self, connection: ConnectionId, msg: ServerMessage) -> bool {
        self.connections.send_to(connection, msg).await
    }

    /// Authenticate and admit `connection` as `device_id`.
    ///
    /// Returns the host name to greet the device with.
    pub async fn register(
        &self,
        connection: ConnectionId,
        device_id: &str,
        name: &str,
        token: Option<&str>,
        pin: Option<&str>,
    ) -> Result<String> {
        let device_id = device_id.trim();
        let name = name.trim();
        if device_id.is_empty() || name.is_empty() {
            return Err(DropError::validation("Device id and name are required."));
        }

        if !self.auth.authenticate(token, pin).await {
            tracing::warn!("Auth failed for device: {}", name);
            return Err(DropError::Auth);
        }

        tracing::info!("Auth successful for device: {}", name);
        // a connection represents one device at a time
        if let Some(previous) = self.registry.owner_of(connection).await {
            if previous != device_id {
                self.registry.release(connection).await;
            }
        }
        self.registry.admit(device_id, name, connection).await;
        Ok(self.settings.server_name().await)
    }

    pub async fn rename_device(&self, device_id: &str, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(DropError::validation("Device name must not be empty."));
        }
        self.registry.rename(device_id, new_name).await;
        Ok(())
    }

    /// Tear down everything tied to a closed connection.
    ///
    /// Transfers it started are left alone until ended or cancelled.
    pub async fn disconnect(&self, connection: ConnectionId) {
        self.connections.close(connection).await;
        self.registry.release(connection).await;
        self.transfers.release_connection(connection).await;
    }

    /// State a dashboard observer needs right after it connects
    pub async fn dashboard_snapshot(&self) -> Vec<DashboardEvent> {
        vec![
            DashboardEvent::ClientUpdate {
                clients: self.registry.names().await,
            },
            DashboardEvent::UploadDirectoryUpdated {
                path: self.settings.upload_root().await.to_string_lossy().to_string(),
            },
            DashboardEvent::ServerNameUpdated {
                name: self.settings.server_name().await,
            },
        ]
    }

    /// Create the upload root if needed and show it in the file browser
    pub async fn open_upload_root(&self) -> Result<PathBuf> {
        let root = self.settings.upload_root().await;
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| DropError::Directory {
                path: root.clone(),
                source,
            })?;
        let opener = self.opener.clone();
        let target = root.clone();
        tokio::task::spawn_blocking(move || opener.open(&target))
            .await
            .map_err(std::io::Error::other)??;
        Ok(root)
    }
}
