//! Destination path computation for incoming files.

use crate::error::{DropError, Result};
use crate::registry::UNKNOWN_DEVICE;
use std::path::{Component, Path, PathBuf};

/// Keep only the normal components of a client-supplied relative path.
///
/// `..`, roots, drive prefixes and `.` are dropped so the result always
/// stays beneath the folder it is joined to.
pub fn sanitize_relative_path(relative_path: &str) -> Result<PathBuf> {
    let normalized = relative_path.replace('\\', "/");
    let clean: PathBuf = Path::new(&normalized)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    if clean.as_os_str().is_empty() {
        return Err(DropError::validation("Invalid relative path."));
    }
    Ok(clean)
}

/// Turn a device display name into a single folder name
pub fn device_folder_name(display_name: &str) -> String {
    let name: String = display_name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();

    if name.is_empty() || name == "." || name == ".." {
        UNKNOWN_DEVICE.to_string()
    } else {
        name
    }
}

/// `<upload_root>/<device folder>/<relative path>`
pub fn destination_path(
    upload_root: &Path,
    device_name: &str,
    relative_path: &str,
) -> Result<PathBuf> {
    let relative = sanitize_relative_path(relative_path)?;
    Ok(upload_root
        .join(device_folder_name(device_name))
        .join(relative))
}
