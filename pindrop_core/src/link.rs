//! Connection links handed to devices: URL with the token plus a QR code.

use qrcode::QrCode;
use qrcode::render::svg;
use serde::Serialize;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionLink {
    /// URL carrying the security token
    pub url: String,
    /// URL without the token, safe to show on screen
    pub display_url: String,
    /// SVG markup of a QR code encoding `url`
    pub qr_code: Option<String>,
}

/// Turns the current token into something a device can open.
pub trait LinkRenderer: Send + Sync {
    fn render(&self, token: &str) -> ConnectionLink;

    /// Dashboard WebSocket endpoint, reachable from this machine only
    fn dashboard_url(&self) -> String;
}

/// Renders `http://<lan ip>:<port>/?token=...` and a matching SVG QR code
pub struct QrLinkRenderer {
    base: String,
    port: u16,
}

impl QrLinkRenderer {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            base: format!("http://{}:{}", host, port),
            port,
        }
    }

    /// Renderer bound to the best LAN address of this machine
    pub fn for_lan(port: u16) -> Self {
        Self::new(&local_lan_ip(), port)
    }
}

impl LinkRenderer for QrLinkRenderer {
    fn render(&self, token: &str) -> ConnectionLink {
        let url = match Url::parse(&self.base) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("token", token);
                url.to_string()
            }
            Err(e) => {
                tracing::warn!("Invalid base URL {}: {}", self.base, e);
                format!("{}/?token={}", self.base, token)
            }
        };

        let qr_code = match QrCode::new(url.as_bytes()) {
            Ok(code) => Some(
                code.render::<svg::Color>()
                    .min_dimensions(200, 200)
                    .max_dimensions(400, 400)
                    .build(),
            ),
            Err(e) => {
                tracing::warn!("QR code generation error: {}", e);
                None
            }
        };

        ConnectionLink {
            url,
            display_url: self.base.clone(),
            qr_code,
        }
    }

    fn dashboard_url(&self) -> String {
        format!("ws://127.0.0.1:{}/dashboard/ws", self.port)
    }
}

/// Get local IP, prioritizing LAN ranges (192.168.x.x, 10.x.x.x, 172.16.x.x)
pub fn local_lan_ip() -> String {
    local_ip_address::list_afinet_netifas()
        .ok()
        .and_then(|ips| {
            let mut best_ip = None;
            for (_name, ip) in ips {
                if ip.is_loopback() || !ip.is_ipv4() {
                    continue;
                }
                let ip_str = ip.to_string();
                if ip_str.starts_with("192.168.") {
                    return Some(ip_str);
                }
                if ip_str.starts_with("10.") {
                    best_ip = Some(ip_str);
                    continue;
                }
                if ip_str.starts_with("172.") && best_ip.is_none() {
                    best_ip = Some(ip_str);
                    continue;
                }
                if best_ip.is_none() {
                    best_ip = Some(ip_str);
                }
            }
            best_ip
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}
