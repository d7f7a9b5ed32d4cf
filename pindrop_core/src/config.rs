use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "pindrop";
const APP_NAME: &str = "pindrop";
const CONFIG_FILE: &str = "config.json";

/// Overrides the config directory (tests, portable installs)
pub const CONFIG_DIR_ENV: &str = "PINDROP_CONFIG_DIR";
/// Overrides the listening port
pub const PORT_ENV: &str = "PINDROP_PORT";

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_SERVER_NAME: &str = "My Local Server";
const UPLOAD_FOLDER_NAME: &str = "FileTransfer_Received";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server_name: String,
    pub upload_dir: PathBuf,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        let server_name = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string());

        Self {
            server_name,
            upload_dir: default_upload_dir(),
            port: DEFAULT_PORT,
        }
    }
}

impl AppConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Port from the environment, falling back to the configured one
    pub fn effective_port(&self) -> u16 {
        std::env::var(PORT_ENV)
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.port)
    }
}

/// `<Desktop>/FileTransfer_Received`, or under home / cwd when there is no desktop
pub fn default_upload_dir() -> PathBuf {
    let base = directories::UserDirs::new()
        .map(|dirs| {
            dirs.desktop_dir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dirs.home_dir().to_path_buf())
        })
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(UPLOAD_FOLDER_NAME)
}

struct Live {
    server_name: String,
    upload_root: PathBuf,
}

/// Host name and upload root as currently in effect.
///
/// Seeded from [`AppConfig`] at startup. Changes made while running live in
/// memory only and are gone after a restart.
pub struct HostSettings {
    live: RwLock<Live>,
}

impl HostSettings {
    pub fn new(server_name: impl Into<String>, upload_root: impl Into<PathBuf>) -> Self {
        Self {
            live: RwLock::new(Live {
                server_name: server_name.into(),
                upload_root: upload_root.into(),
            }),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.server_name.clone(), config.upload_dir.clone())
    }

    pub async fn server_name(&self) -> String {
        self.live.read().await.server_name.clone()
    }

    pub async fn upload_root(&self) -> PathBuf {
        self.live.read().await.upload_root.clone()
    }

    pub async fn set_server_name(&self, name: String) {
        self.live.write().await.server_name = name;
    }

    pub async fn set_upload_root(&self, root: PathBuf) {
        self.live.write().await.upload_root = root;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_upload_dir_name() {
        assert!(default_upload_dir().ends_with(UPLOAD_FOLDER_NAME));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"server_name":"Den"}"#).unwrap();
        assert_eq!(config.server_name, "Den");
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn test_runtime_changes_stay_in_memory() {
        let dir = std::env::temp_dir().join(format!("pindrop_cfg_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE);
        let original = r#"{"server_name":"Old","upload_dir":"/tmp/old","port":5000}"#;
        fs::write(&path, original).unwrap();

        let settings = HostSettings::from_config(&AppConfig::load_from(&path));
        assert_eq!(settings.server_name().await, "Old");

        settings.set_server_name("New".to_string()).await;
        settings.set_upload_root(PathBuf::from("/tmp/new")).await;
        assert_eq!(settings.server_name().await, "New");
        assert_eq!(settings.upload_root().await, PathBuf::from("/tmp/new"));

        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        let reloaded = AppConfig::load_from(&path);
        assert_eq!(reloaded.server_name, "Old");
        assert_eq!(reloaded.upload_dir, PathBuf::from("/tmp/old"));

        let _ = fs::remove_dir_all(&dir);
    }
}
