//! Application wiring and orchestration

mod actions;
mod progress;

use crate::catalogue::{Catalogue, HttpCatalogue};
use crate::config::Config;
use crate::db::Database;
use crate::download::{DownloadSource, HttpDownloadSource};
use crate::hub::Hub;
use crate::tasks::ModTasks;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Main application struct that owns all components
pub struct App {
    /// Application configuration
    pub config: Arc<RwLock<Config>>,

    /// Database connection
    pub db: Arc<Database>,

    /// In-process status hub that runs publish into
    pub hub: Arc<Hub>,

    /// Install/uninstall orchestrator
    pub tasks: ModTasks,
}

impl App {
    /// Create a new App instance
    pub async fn new(config: Config) -> Result<Self> {
        // Ensure directories exist
        config.ensure_dirs().context("Failed to create directories")?;

        // Initialize database
        let db = Database::open(&config.paths.database_file())
            .context("Failed to open database")?;

        let catalogue = HttpCatalogue::new(
            &config.catalogue.base_url,
            Duration::from_secs(config.catalogue.timeout_secs),
        )
        .context("Failed to initialize catalogue client")?;
        let source = HttpDownloadSource::new().context("Failed to initialize downloader")?;

        Ok(Self::with_services(
            config,
            Arc::new(db),
            Arc::new(catalogue),
            Arc::new(source),
        ))
    }

    /// Assemble an App from already constructed services
    pub fn with_services(
        config: Config,
        db: Arc<Database>,
        catalogue: Arc<dyn Catalogue>,
        source: Arc<dyn DownloadSource>,
    ) -> Self {
        let hub = Arc::new(Hub::new());
        let tasks = ModTasks::new(
            db.clone(),
            hub.clone(),
            catalogue,
            source,
            config.task_settings(),
        );

        Self {
            config: Arc::new(RwLock::new(config)),
            db,
            hub,
            tasks,
        }
    }

    /// Set the game install and data folders. `None` leaves a folder unchanged,
    /// an empty value clears it.
    pub async fn set_install_paths(
        &self,
        install_dir: Option<&str>,
        data_dir: Option<&str>,
    ) -> Result<()> {
        let mut config = self.config.write().await;
        if let Some(dir) = install_dir {
            config.game.install_dir = normalize_dir(dir);
        }
        if let Some(dir) = data_dir {
            config.game.data_dir = normalize_dir(dir);
        }
        config.save().await?;
        Ok(())
    }

    /// Set or clear downloads directory override.
    pub async fn set_downloads_dir_override(&self, path: Option<&str>) -> Result<()> {
        let mut config = self.config.write().await;
        config.downloads_dir_override = path.and_then(normalize_dir);
        config.save().await?;
        Ok(())
    }
}

fn normalize_dir(path: &str) -> Option<String> {
    Some(path.trim())
        .filter(|p| !p.is_empty())
        .map(ToOwned::to_owned)
}
