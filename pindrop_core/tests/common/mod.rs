#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use pindrop_core::Hub;
use pindrop_core::auth::{AuthGate, Credentials};
use pindrop_core::config::HostSettings;
use pindrop_core::http_share;
use pindrop_core::link::QrLinkRenderer;
use pindrop_core::opener::PathOpener;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const PIN: &str = "1234";
pub const TOKEN: &str = "test-token";

struct NoopOpener;

impl PathOpener for NoopOpener {
    fn open(&self, _path: &Path) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct TestServer {
    pub hub: Arc<Hub>,
    pub root: PathBuf,
    pub port: u16,
    cancel: CancellationToken,
}

impl TestServer {
    pub async fn start() -> Self {
        let root = std::env::temp_dir().join(format!("pindrop_it_{}", uuid::Uuid::new_v4()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let hub = Arc::new(Hub::new(
            HostSettings::new("Test Host", root.clone()),
            AuthGate::with_credentials(Credentials {
                pin: PIN.to_string(),
                token: TOKEN.to_string(),
            }),
            Arc::new(QrLinkRenderer::new("127.0.0.1", port)),
            Arc::new(NoopOpener),
        ));

        let cancel = CancellationToken::new();
        tokio::spawn(http_share::serve(listener, hub.clone(), Some(cancel.clone())));

        Self {
            hub,
            root,
            port,
            cancel,
        }
    }

    pub async fn device(&self) -> Socket {
        let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", self.port))
            .await
            .expect("Failed to connect device socket");
        ws
    }

    pub async fn dashboard(&self) -> Socket {
        let (ws, _) = connect_async(self.hub.dashboard().dashboard_url())
            .await
            .expect("Failed to connect dashboard socket");
        ws
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

pub async fn send_json<T: Serialize>(ws: &mut Socket, msg: &T) {
    let text = serde_json::to_string(msg).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

pub async fn send_raw(ws: &mut Socket, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Next JSON message, skipping pings
pub async fn recv_json<T: DeserializeOwned>(ws: &mut Socket) -> T {
    timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("Timeout waiting for message")
}

/// Read until `pred` matches, discarding everything before it
pub async fn recv_until<T: DeserializeOwned, F: Fn(&T) -> bool>(ws: &mut Socket, pred: F) -> T {
    loop {
        let msg: T = recv_json(ws).await;
        if pred(&msg) {
            return msg;
        }
    }
}
