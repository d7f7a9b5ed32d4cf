//! Active transfers and their chunk-receipt state machine.
//!
//! A transfer is `Active` for as long as its record exists. Completing,
//! cancelling or failing removes the record; any later message naming the
//! same id gets [`DropError::UnknownTransfer`].

use super::paths::destination_path;
use crate::config::HostSettings;
use crate::connection::{ConnectionId, ConnectionTable};
use crate::dashboard::{DashboardEvent, EventBus};
use crate::error::{DropError, Result};
use crate::protocol::ServerMessage;
use crate::registry::DeviceRegistry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

pub type TransferId = Uuid;

/// Write side of a transfer. The mutex around it admits one chunk at a time.
struct Sink {
    file: Option<File>,
    bytes_received: u64,
}

struct Transfer {
    owner: ConnectionId,
    destination: PathBuf,
    file_name: String,
    declared_size: u64,
    sink: Arc<Mutex<Sink>>,
}

/// Point-in-time view of an active transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub owner: ConnectionId,
    pub destination: PathBuf,
    pub file_name: String,
    pub declared_size: u64,
    pub bytes_received: u64,
}

pub struct TransferManager {
    transfers: Mutex<HashMap<TransferId, Transfer>>,
    registry: Arc<DeviceRegistry>,
    settings: Arc<HostSettings>,
    connections: Arc<ConnectionTable>,
    bus: EventBus,
}

impl TransferManager {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        settings: Arc<HostSettings>,
        connections: Arc<ConnectionTable>,
        bus: EventBus,
    ) -> Self {
        Self {
            transfers: Mutex::new(HashMap::new()),
            registry,
            settings,
            connections,
            bus,
        }
    }

    /// Open `<root>/<device>/<relative_path>` for writing and register a transfer.
    ///
    /// Nothing is registered or announced if the destination cannot be prepared.
    pub async fn start_transfer(
        &self,
        connection: ConnectionId,
        relative_path: &str,
        declared_size: u64,
    ) -> Result<TransferId> {
        let device_name = self.registry.resolve_owner(connection).await;
        let upload_root = self.settings.upload_root().await;
        let destination = destination_path(&upload_root, &device_name, relative_path)?;
        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DropError::Directory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let file = File::create(&destination)
            .await
            .map_err(|source| DropError::Directory {
                path: destination.clone(),
                source,
            })?;

        let id = self
            .register(connection, destination, file_name.clone(), declared_size, file)
            .await;

        tracing::info!(
            "Started transfer {} for '{}' ({} bytes) from {}",
            id,
            file_name,
            declared_size,
            device_name
        );
        self.bus.emit(DashboardEvent::TransferStarted {
            transfer_id: id,
            file_name,
        });
        Ok(id)
    }

    async fn register(
        &self,
        owner: ConnectionId,
        destination: PathBuf,
        file_name: String,
        declared_size: u64,
        file: File,
    ) -> TransferId {
        let mut transfers = self.transfers.lock().await;
        let id = loop {
            let candidate = Uuid::new_v4();
            if !transfers.contains_key(&candidate) {
                break candidate;
            }
        };
        transfers.insert(
            id,
            Transfer {
                owner,
                destination,
                file_name,
                declared_size,
                sink: Arc::new(Mutex::new(Sink {
                    file: Some(file),
                    bytes_received: 0,
                })),
            },
        );
        id
    }

    /// Append one chunk. Returns the running byte count on success.
    ///
    /// Progress goes to the dashboard and to `origin`. A failed write aborts
    /// the transfer: the handle is dropped and the record removed.
    pub async fn write_chunk(
        &self,
        origin: ConnectionId,
        transfer_id: TransferId,
        chunk: &[u8],
    ) -> Result<u64> {
        let (sink, file_name, total) = {
            let transfers = self.transfers.lock().await;
            let transfer = transfers
                .get(&transfer_id)
                .ok_or(DropError::UnknownTransfer(transfer_id))?;
            (
                transfer.sink.clone(),
                transfer.file_name.clone(),
                transfer.declared_size,
            )
        };

        let mut sink = sink.lock().await;
        // ended or cancelled while this chunk waited for the lock
        let Some(file) = sink.file.as_mut() else {
            return Err(DropError::UnknownTransfer(transfer_id));
        };

        let written = async {
            file.write_all(chunk).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            sink.file = None;
            drop(sink);
            tracing::error!("Error writing chunk for transfer {}: {}", transfer_id, e);

            if self.transfers.lock().await.remove(&transfer_id).is_some() {
                self.bus.emit(DashboardEvent::TransferFailed {
                    transfer_id,
                    file_name,
                    message: e.to_string(),
                });
            }
            return Err(DropError::Write(e));
        }

        sink.bytes_received += chunk.len() as u64;
        let received = sink.bytes_received;
        drop(sink);

        tracing::debug!(
            "Wrote {} bytes to transfer {} ({}/{})",
            chunk.len(),
            transfer_id,
            received,
            total
        );
        self.bus.emit(DashboardEvent::TransferProgress {
            transfer_id,
            received,
            total,
        });
        self.connections
            .send_to(
                origin,
                ServerMessage::ClientProgress {
                    transfer_id,
                    received,
                    total,
                },
            )
            .await;
        Ok(received)
    }

    /// Close the file and report completion. Unknown ids are a quiet no-op.
    ///
    /// Returns whether a transfer was actually completed.
    pub async fn end_transfer(&self, origin: ConnectionId, transfer_id: TransferId) -> Result<bool> {
        let Some(transfer) = self.transfers.lock().await.remove(&transfer_id) else {
            tracing::debug!("Ignoring end for unknown transfer {}", transfer_id);
            return Ok(false);
        };

        let closed = {
            let mut sink = transfer.sink.lock().await;
            match sink.file.take() {
                Some(mut file) => {
                    let result = async {
                        file.flush().await?;
                        file.sync_all().await
                    }
                    .await;
                    result.map(|()| sink.bytes_received)
                }
                None => Ok(sink.bytes_received),
            }
        };

        match closed {
            Ok(bytes) => {
                tracing::info!(
                    "Transfer {} complete: '{}' ({} bytes)",
                    transfer_id,
                    transfer.file_name,
                    bytes
                );
                self.bus.emit(DashboardEvent::TransferComplete {
                    transfer_id,
                    file_name: transfer.file_name.clone(),
                });
                self.connections
                    .send_to(
                        origin,
                        ServerMessage::TransferComplete {
                            transfer_id,
                            filename: transfer.file_name,
                        },
                    )
                    .await;
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Error closing transfer {}: {}", transfer_id, e);
                self.bus.emit(DashboardEvent::TransferFailed {
                    transfer_id,
                    file_name: transfer.file_name,
                    message: e.to_string(),
                });
                Err(DropError::Write(e))
            }
        }
    }

    /// Drop the handle and delete whatever was written. Unknown ids are a no-op.
    ///
    /// Returns whether a transfer was actually cancelled.
    pub async fn cancel_transfer(&self, transfer_id: TransferId) -> bool {
        let Some(transfer) = self.transfers.lock().await.remove(&transfer_id) else {
            tracing::debug!("Ignoring cancel for unknown transfer {}", transfer_id);
            return false;
        };

        transfer.sink.lock().await.file = None;

        match tokio::fs::remove_file(&transfer.destination).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(
                "Error deleting cancelled file {:?}: {}",
                transfer.destination,
                e
            ),
        }

        tracing::info!("Transfer {} cancelled: '{}'", transfer_id, transfer.file_name);
        self.bus.emit(DashboardEvent::TransferCancelled {
            transfer_id,
            file_name: transfer.file_name,
        });
        true
    }

    /// Called when a connection closes. Its transfers are left registered
    /// until the sender ends or cancels them.
    ///
    /// Returns how many transfers the connection left open.
    pub async fn release_connection(&self, connection: ConnectionId) -> usize {
        let orphans = self
            .transfers
            .lock()
            .await
            .values()
            .filter(|t| t.owner == connection)
            .count();
        if orphans > 0 {
            tracing::warn!(
                "{} disconnected with {} open transfer(s); they stay registered",
                connection,
                orphans
            );
        }
        orphans
    }

    pub async fn get(&self, transfer_id: TransferId) -> Option<TransferSnapshot> {
        let (snapshot, sink) = {
            let transfers = self.transfers.lock().await;
            let t = transfers.get(&transfer_id)?;
            (
                TransferSnapshot {
                    id: transfer_id,
                    owner: t.owner,
                    destination: t.destination.clone(),
                    file_name: t.file_name.clone(),
                    declared_size: t.declared_size,
                    bytes_received: 0,
                },
                t.sink.clone(),
            )
        };
        let bytes_received = sink.lock().await.bytes_received;
        Some(TransferSnapshot {
            bytes_received,
            ..snapshot
        })
    }

    pub async fn active_count(&self) -> usize {
        self.transfers.lock().await.len()
    }

    #[cfg(test)]
    async fn insert_with_file(&self, owner: ConnectionId, destination: PathBuf, file: File) -> TransferId {
        let file_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.register(owner, destination, file_name, 0, file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerMessage;
    use std::collections::HashSet;
    use tokio::sync::{broadcast, mpsc};

    struct Harness {
        manager: Arc<TransferManager>,
        registry: Arc<DeviceRegistry>,
        events: broadcast::Receiver<DashboardEvent>,
        conn: ConnectionId,
        device_rx: mpsc::Receiver<ServerMessage>,
        root: PathBuf,
        connections: Arc<ConnectionTable>,
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    async fn harness() -> Harness {
        let root = std::env::temp_dir().join(format!("pindrop_transfer_{}", Uuid::new_v4()));
        let bus = EventBus::default();
        let registry = Arc::new(DeviceRegistry::new(bus.clone()));
        let settings = Arc::new(HostSettings::new("Host", root.clone()));
        let connections = Arc::new(ConnectionTable::new());
        let (conn, device_rx) = connections.open().await;
        registry.admit("phone-1", "Phone", conn).await;

        let events = bus.subscribe();
        let manager = Arc::new(TransferManager::new(
            registry.clone(),
            settings,
            connections.clone(),
            bus,
        ));
        Harness {
            manager,
            registry,
            events,
            conn,
            device_rx,
            root,
            connections,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<DashboardEvent>) -> Vec<DashboardEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_single_chunk_transfer() {
        let mut h = harness().await;

        let id = h
            .manager
            .start_transfer(h.conn, "notes/todo.txt", 9)
            .await
            .unwrap();
        assert_eq!(
            drain(&mut h.events),
            vec![DashboardEvent::TransferStarted {
                transfer_id: id,
                file_name: "todo.txt".to_string()
            }]
        );

        let received = h.manager.write_chunk(h.conn, id, b"buy milk!").await.unwrap();
        assert_eq!(received, 9);
        assert!(h.manager.end_transfer(h.conn, id).await.unwrap());

        let path = h.root.join("Phone").join("notes").join("todo.txt");
        assert_eq!(std::fs::read(&path).unwrap(), b"buy milk!");

        let events = drain(&mut h.events);
        assert_eq!(
            events,
            vec![
                DashboardEvent::TransferProgress {
                    transfer_id: id,
                    received: 9,
                    total: 9
                },
                DashboardEvent::TransferComplete {
                    transfer_id: id,
                    file_name: "todo.txt".to_string()
                },
            ]
        );
        assert_eq!(
            h.device_rx.recv().await,
            Some(ServerMessage::ClientProgress {
                transfer_id: id,
                received: 9,
                total: 9
            })
        );
        assert_eq!(
            h.device_rx.recv().await,
            Some(ServerMessage::TransferComplete {
                transfer_id: id,
                filename: "todo.txt".to_string()
            })
        );

        assert!(matches!(
            h.manager.write_chunk(h.conn, id, b"more").await,
            Err(DropError::UnknownTransfer(unknown)) if unknown == id
        ));
        assert_eq!(h.manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_bytes_received_is_running_sum() {
        let h = harness().await;
        let id = h.manager.start_transfer(h.conn, "big.bin", 1000).await.unwrap();

        let chunks: [&[u8]; 4] = [&[1; 100], &[2; 250], &[3; 1], &[4; 649]];
        let mut expected = 0u64;
        for chunk in chunks {
            expected += chunk.len() as u64;
            let received = h.manager.write_chunk(h.conn, id, chunk).await.unwrap();
            assert_eq!(received, expected);
            assert_eq!(h.manager.get(id).await.unwrap().bytes_received, expected);
        }

        h.manager.end_transfer(h.conn, id).await.unwrap();
        let len = std::fs::metadata(h.root.join("Phone").join("big.bin")).unwrap().len();
        assert_eq!(len, 1000);
    }

    #[tokio::test]
    async fn test_transfer_ids_are_unique() {
        let h = harness().await;
        let mut ids = HashSet::new();
        for i in 0..50 {
            let id = h
                .manager
                .start_transfer(h.conn, &format!("f{}.txt", i), 0)
                .await
                .unwrap();
            assert!(ids.insert(id));
        }
        assert_eq!(h.manager.active_count().await, 50);
    }

    #[tokio::test]
    async fn test_end_and_cancel_are_idempotent() {
        let mut h = harness().await;

        let a = h.manager.start_transfer(h.conn, "a.txt", 1).await.unwrap();
        let b = h.manager.start_transfer(h.conn, "b.txt", 1).await.unwrap();
        drain(&mut h.events);

        assert!(h.manager.end_transfer(h.conn, a).await.unwrap());
        assert!(!h.manager.end_transfer(h.conn, a).await.unwrap());
        assert!(!h.manager.cancel_transfer(a).await);

        assert!(h.manager.cancel_transfer(b).await);
        assert!(!h.manager.cancel_transfer(b).await);
        assert!(!h.manager.end_transfer(h.conn, b).await.unwrap());

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 2, "one broadcast per terminal transition: {:?}", events);
    }

    #[tokio::test]
    async fn test_cancel_deletes_partial_file() {
        let mut h = harness().await;
        let id = h.manager.start_transfer(h.conn, "docs/part.bin", 100).await.unwrap();
        h.manager.write_chunk(h.conn, id, &[7; 40]).await.unwrap();

        let path = h.root.join("Phone").join("docs").join("part.bin");
        assert!(path.exists());

        drain(&mut h.events);
        assert!(h.manager.cancel_transfer(id).await);
        assert!(!path.exists());
        assert_eq!(
            drain(&mut h.events),
            vec![DashboardEvent::TransferCancelled {
                transfer_id: id,
                file_name: "part.bin".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_cancel_tolerates_missing_file() {
        let h = harness().await;
        let id = h.manager.start_transfer(h.conn, "gone.txt", 5).await.unwrap();
        std::fs::remove_file(h.root.join("Phone").join("gone.txt")).unwrap();

        assert!(h.manager.cancel_transfer(id).await);
        assert_eq!(h.manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_directory_failure_creates_nothing() {
        let mut h = harness().await;
        std::fs::create_dir_all(&h.root).unwrap();
        // the device folder is a regular file, so nothing can go beneath it
        std::fs::write(h.root.join("Phone"), b"not a dir").unwrap();

        let result = h.manager.start_transfer(h.conn, "notes/todo.txt", 9).await;

        assert!(matches!(result, Err(DropError::Directory { .. })));
        assert_eq!(h.manager.active_count().await, 0);
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_connection_uses_unknown_folder() {
        let h = harness().await;
        let (stranger, _rx) = h.connections.open().await;

        let id = h.manager.start_transfer(stranger, "x.txt", 0).await.unwrap();
        let snapshot = h.manager.get(id).await.unwrap();
        assert_eq!(
            snapshot.destination,
            h.root.join(crate::registry::UNKNOWN_DEVICE).join("x.txt")
        );
    }

    #[tokio::test]
    async fn test_write_failure_aborts_transfer() {
        let mut h = harness().await;
        std::fs::create_dir_all(&h.root).unwrap();
        let path = h.root.join("readonly.bin");
        std::fs::write(&path, b"").unwrap();
        let read_only = File::open(&path).await.unwrap();

        let id = h.manager.insert_with_file(h.conn, path, read_only).await;

        let result = h.manager.write_chunk(h.conn, id, b"data").await;
        assert!(matches!(result, Err(DropError::Write(_))));
        assert_eq!(h.manager.active_count().await, 0);
        assert!(matches!(
            drain(&mut h.events).as_slice(),
            [DashboardEvent::TransferFailed { transfer_id, .. }] if *transfer_id == id
        ));
        assert!(matches!(
            h.manager.write_chunk(h.conn, id, b"data").await,
            Err(DropError::UnknownTransfer(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_chunks_are_serialized() {
        let h = harness().await;
        let id = h.manager.start_transfer(h.conn, "race.bin", 4096).await.unwrap();

        let mut handles = vec![];
        for i in 0..16u8 {
            let manager = h.manager.clone();
            let conn = h.conn;
            handles.push(tokio::spawn(async move {
                manager.write_chunk(conn, id, &[i; 256]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(h.manager.get(id).await.unwrap().bytes_received, 4096);
        h.manager.end_transfer(h.conn, id).await.unwrap();

        // every chunk landed whole, never interleaved with another
        let bytes = std::fs::read(h.root.join("Phone").join("race.bin")).unwrap();
        assert_eq!(bytes.len(), 4096);
        for block in bytes.chunks(256) {
            assert!(block.iter().all(|b| *b == block[0]));
        }
    }

    #[tokio::test]
    async fn test_disconnect_leaves_transfers_registered() {
        let h = harness().await;
        let id = h.manager.start_transfer(h.conn, "orphan.txt", 3).await.unwrap();

        h.registry.release(h.conn).await;
        assert_eq!(h.manager.release_connection(h.conn).await, 1);
        assert!(h.manager.get(id).await.is_some());

        // the sender can still finish it from a new connection
        let (other, _rx) = h.connections.open().await;
        h.manager.write_chunk(other, id, b"abc").await.unwrap();
        assert!(h.manager.end_transfer(other, id).await.unwrap());
    }
}
