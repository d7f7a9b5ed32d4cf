use anyhow::Context;
use pindrop_core::auth::AuthGate;
use pindrop_core::config::{AppConfig, HostSettings};
use pindrop_core::http_share;
use pindrop_core::link::QrLinkRenderer;
use pindrop_core::opener::SystemOpener;
use pindrop_core::Hub;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 0. Environment and logging
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Startup settings; runtime changes are not written back
    let config = AppConfig::load();
    let port = config.effective_port();

    let hub = Arc::new(Hub::new(
        HostSettings::from_config(&config),
        AuthGate::new(),
        Arc::new(QrLinkRenderer::for_lan(port)),
        Arc::new(SystemOpener),
    ));

    // 2. Bind; nothing else is fatal
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let link = hub.dashboard().current_link().await;
    println!("Server running on port {}", port);
    println!("Dashboard (this machine only): {}", hub.dashboard().dashboard_url());
    println!("Devices connect at: {}", link.display_url);
    println!("PIN: {}", hub.auth().pin().await);
    println!("Upload folder: {}", hub.settings().upload_root().await.display());

    // 3. Serve until Ctrl+C
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, shutting down");
        }
        shutdown.cancel();
    });

    http_share::serve(listener, hub, Some(cancel)).await
}
