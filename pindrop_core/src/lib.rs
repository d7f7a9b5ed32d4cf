//! Core of the pindrop LAN drop box.
//!
//! Devices on the local network authenticate with a PIN or the token baked
//! into the host's QR code, then push files over a WebSocket in ack-gated
//! chunks. A loopback-only dashboard channel mirrors every device and
//! transfer event and lets the host change its name, PIN and upload folder.

pub mod auth;
pub mod config;
pub mod connection;
pub mod dashboard;
pub mod error;
pub mod http_share;
pub mod hub;
pub mod link;
pub mod opener;
pub mod protocol;
pub mod registry;
pub mod transfer;

pub use error::{DropError, Result};
pub use hub::Hub;
