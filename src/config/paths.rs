//! XDG-compliant path management

use directories::ProjectDirs;
use std::path::PathBuf;

/// Manages all application paths using XDG base directory specification
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directories from XDG
    dirs: ProjectDirs,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    /// Create a new Paths instance
    pub fn new() -> Self {
        let dirs = ProjectDirs::from("", "", "smods-manager")
            .expect("Failed to determine project directories");
        Self { dirs }
    }

    // ========== Config Paths ==========

    /// Config directory: ~/.config/smods-manager/
    pub fn config_dir(&self) -> PathBuf {
        self.dirs.config_dir().to_path_buf()
    }

    /// Main config file: ~/.config/smods-manager/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("config.toml")
    }

    // ========== Data Paths ==========

    /// Data directory: ~/.local/share/smods-manager/
    pub fn data_dir(&self) -> PathBuf {
        self.dirs.data_dir().to_path_buf()
    }

    /// Database file: ~/.local/share/smods-manager/smods.db
    pub fn database_file(&self) -> PathBuf {
        self.data_dir().join("smods.db")
    }

    /// Downloads directory: ~/.local/share/smods-manager/downloads/
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir().join("downloads")
    }

    /// Log file: ~/.local/share/smods-manager/smods.log
    pub fn log_file(&self) -> PathBuf {
        self.data_dir().join("smods.log")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.data_dir())?;
        std::fs::create_dir_all(self.downloads_dir())?;
        Ok(())
    }
}
