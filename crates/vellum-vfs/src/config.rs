//! Configuration for the file system and the `vellum` binary.
//!
//! Read from `~/.config/vellum/config.toml` by default. Every field is
//! optional; missing fields fall back to [`VfsConfig::default`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{VfsError, VfsResult};

/// Environment variable that overrides the store location.
pub const STORE_ENV: &str = "VELLUM_DB";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// SQLite database holding memory-only files.
    pub store_path: Option<PathBuf>,
    /// Directory to bind on startup (disk-backed mode).
    pub root: Option<PathBuf>,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            root: None,
            log_level: "info".to_string(),
        }
    }
}

/// Get the config file path (~/.config/vellum/config.toml).
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("vellum").join("config.toml"))
}

/// Get the default store path (~/.local/share/vellum/files.db).
pub fn default_store_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|p| p.join("vellum").join("files.db"))
}

impl VfsConfig {
    pub fn from_toml_str(s: &str) -> VfsResult<Self> {
        toml::from_str(s).map_err(|e| VfsError::Config(e.to_string()))
    }

    /// Load a config file. A missing file is an error.
    pub fn load(path: impl AsRef<Path>) -> VfsResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| VfsError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load the config file at the default location, or defaults if absent.
    pub fn load_default() -> VfsResult<Self> {
        match config_file_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Resolve the store location: `VELLUM_DB`, then the config, then the
    /// platform data directory.
    pub fn store_path(&self) -> VfsResult<PathBuf> {
        self.resolve_store_path(std::env::var_os(STORE_ENV).map(PathBuf::from))
    }

    fn resolve_store_path(&self, from_env: Option<PathBuf>) -> VfsResult<PathBuf> {
        from_env
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| self.store_path.clone())
            .or_else(default_store_path)
            .ok_or_else(|| VfsError::Config("no data directory available for the store".into()))
    }
}
