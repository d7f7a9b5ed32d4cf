use std::path::Path;

/// Opens a folder in the host's file browser.
pub trait PathOpener: Send + Sync {
    fn open(&self, path: &Path) -> std::io::Result<()>;
}

/// Hands the folder to the desktop's default handler.
///
/// Blocks until the launcher exits and fails if it reports an error.
pub struct SystemOpener;

impl PathOpener for SystemOpener {
    fn open(&self, path: &Path) -> std::io::Result<()> {
        open::that(path)?;
        tracing::info!("Opened {:?}", path);
        Ok(())
    }
}
