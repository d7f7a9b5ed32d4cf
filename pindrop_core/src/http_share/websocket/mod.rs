//! WebSocket handlers
//!
//! One task per device socket processes its messages strictly in order; a
//! second task drains the connection's outbound queue. Dashboard sockets
//! forward the event bus and accept host configuration commands.

mod dashboard;
mod handler;
mod utils;

pub use dashboard::{handle_command, handle_dashboard_socket};
pub use handler::handle_socket;
