//! Configuration management for smods-manager
//!
//! Uses XDG-compliant paths:
//! - Config: ~/.config/smods-manager/config.toml
//! - Data: ~/.local/share/smods-manager/

mod paths;

pub use paths::Paths;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Default manual-download wait, in seconds
pub const DEFAULT_MANUAL_DOWNLOAD_TIMEOUT_SECS: u64 = 500;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Game install and data locations
    pub game: GameConfig,

    /// Remote catalogue service
    pub catalogue: CatalogueConfig,

    /// Status broadcast hub listener
    pub hub: HubConfig,

    /// Override for downloaded archives directory
    pub downloads_dir_override: Option<String>,

    /// How long to wait for a manually downloaded archive
    pub manual_download_timeout_secs: u64,

    /// Open the revision page in a browser when the server refuses a direct download
    pub open_browser_on_auth_denied: bool,

    /// Paths configuration
    #[serde(skip)]
    pub paths: Paths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            game: GameConfig::default(),
            catalogue: CatalogueConfig::default(),
            hub: HubConfig::default(),
            downloads_dir_override: None,
            manual_download_timeout_secs: DEFAULT_MANUAL_DOWNLOAD_TIMEOUT_SECS,
            open_browser_on_auth_denied: true,
            paths: Paths::new(),
        }
    }
}

/// Cities: Skylines folders. Both must be set before anything can be installed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Game installation folder (contains `Files/Mods`)
    pub install_dir: Option<String>,
    /// Game data folder (contains `Maps` and `Addons`)
    pub data_dir: Option<String>,
}

/// Catalogue service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            timeout_secs: 30,
        }
    }
}

/// WebSocket hub settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 5001,
        }
    }
}

impl HubConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .with_context(|| format!("Invalid hub address {}:{}", self.address, self.port))
    }
}

/// Resolved install and data roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRoots {
    pub install_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl InstallRoots {
    pub fn new(install_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Destination folder for an asset of the given catalogue category.
    pub fn target_folder(&self, category: &str) -> PathBuf {
        let category = category.trim().to_lowercase();
        let addons = self.data_dir.join("Addons");

        if category == "mod" {
            self.install_dir.join("Files").join("Mods")
        } else if category == "map" {
            self.data_dir.join("Maps")
        } else if category.contains("color correction") {
            addons.join("ColorCorrections")
        } else if category == "map theme" {
            addons.join("MapThemes")
        } else if category.contains("style") {
            addons.join("Styles")
        } else {
            addons.join("Assets")
        }
    }
}

/// The subset of configuration an install/uninstall run reads
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub roots: Option<InstallRoots>,
    pub downloads_dir: PathBuf,
    pub manual_download_timeout: Duration,
    pub open_browser_on_auth_denied: bool,
}

impl Config {
    /// Install roots, if both folders are configured
    pub fn install_roots(&self) -> Option<InstallRoots> {
        let install = self.game.install_dir.as_deref().map(str::trim)?;
        let data = self.game.data_dir.as_deref().map(str::trim)?;
        if install.is_empty() || data.is_empty() {
            return None;
        }
        Some(InstallRoots::new(install, data))
    }

    /// Resolve configured downloads directory (override or default XDG path)
    pub fn downloads_dir(&self) -> PathBuf {
        self.downloads_dir_override
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.paths.downloads_dir())
    }

    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            roots: self.install_roots(),
            downloads_dir: self.downloads_dir(),
            manual_download_timeout: Duration::from_secs(self.manual_download_timeout_secs),
            open_browser_on_auth_denied: self.open_browser_on_auth_denied,
        }
    }

    /// Ensure required directories exist, including overrides.
    pub fn ensure_dirs(&self) -> Result<()> {
        self.paths
            .ensure_dirs()
            .context("Failed to create default application directories")?;
        std::fs::create_dir_all(self.downloads_dir())
            .context("Failed to create downloads directory")?;
        Ok(())
    }

    /// Load configuration from disk or create default
    pub async fn load() -> Result<Self> {
        let paths = Paths::new();
        let mut config = Self::load_from(&paths.config_file()).await?;
        config.paths = paths;
        Ok(config)
    }

    async fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .await
                .context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            let config = Config::default();
            config.save_to(config_path).await?;
            Ok(config)
        }
    }

    /// Save configuration to disk
    pub async fn save(&self) -> Result<()> {
        self.save_to(&self.paths.config_file()).await
    }

    async fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(config_path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }
}
