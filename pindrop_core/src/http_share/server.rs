//! HTTP server for the device and dashboard channels
//!
//! LAN HTTP server with WebSocket uploads. Dashboard routes only answer
//! requests coming from this machine.

use crate::hub::Hub;
use anyhow::Result;
use axum::{
    Json, Router,
    extract::{ConnectInfo, Request, State, ws::WebSocketUpgrade},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;

use super::websocket;

/// Largest WebSocket message accepted from a device (40 MiB)
pub const MAX_MESSAGE_SIZE: usize = 40 * 1024 * 1024;

/// Plain HTTP bodies are tiny; uploads go over the WebSocket
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Handler for invalid routes
async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Middleware to add security headers
async fn add_security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; style-src 'self' 'unsafe-inline'; script-src 'self' 'unsafe-inline'; connect-src 'self' ws: wss:; img-src 'self' data:;"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );

    response
}

/// Device WebSocket upgrade handler
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<Hub>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let ip = addr.ip().to_string();
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| websocket::handle_socket(socket, hub, ip))
}

/// Dashboard WebSocket upgrade handler
async fn dashboard_upgrade_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<Hub>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    if !addr.ip().is_loopback() {
        tracing::warn!("Rejected dashboard connection from {}", addr);
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| websocket::handle_dashboard_socket(socket, hub))
}

async fn open_uploads_folder(
    State(hub): State<Arc<Hub>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }

    match hub.open_upload_root().await {
        Ok(_) => Json(json!({ "status": "success" })).into_response(),
        Err(e) => {
            tracing::error!("Failed to open upload folder: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Build the axum router around a shared hub
pub fn create_router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .route("/dashboard/ws", get(dashboard_upgrade_handler))
        .route("/open-uploads-folder", post(open_uploads_folder))
        .fallback(not_found_handler)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(middleware::from_fn(add_security_headers))
        .with_state(hub)
}

/// Serve on an already bound listener until `cancel_token` fires
pub async fn serve(
    listener: TcpListener,
    hub: Arc<Hub>,
    cancel_token: Option<CancellationToken>,
) -> Result<()> {
    let router = create_router(hub);
    let service = router.into_make_service_with_connect_info::<SocketAddr>();

    if let Some(ct) = cancel_token {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                ct.cancelled().await;
                tracing::info!("HTTP server shutting down gracefully");
            })
            .await?;
    } else {
        axum::serve(listener, service).await?;
    }

    Ok(())
}
