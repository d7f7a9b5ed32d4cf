//! HTTP surface of the host
//!
//! Devices and the dashboard talk to the hub over WebSockets.

pub mod server;
pub mod websocket;

pub use server::{create_router, serve};
