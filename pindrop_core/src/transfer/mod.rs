//! Chunked file transfers from devices into the upload root.
//!
//! This module provides:
//! - Destination path computation with traversal stripping
//! - The transfer manager driving each transfer's chunk state machine

pub mod manager;
pub mod paths;

// Re-export public API
pub use manager::{TransferId, TransferManager, TransferSnapshot};
pub use paths::{destination_path, device_folder_name, sanitize_relative_path};
