//! CLI command action handlers

use super::progress::ProgressView;
use super::App;
use crate::hub::{self, client::Forwarder};
use crate::tasks::ModTasks;
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::task::JoinHandle;

const FORWARDER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

impl App {
    // ========== Hub Commands ==========

    pub async fn cmd_serve(&self) -> Result<()> {
        let addr = self.config.read().await.hub.socket_addr()?;
        println!("Status hub listening on ws://{}", addr);
        println!("Press Ctrl-C to stop.");

        tokio::select! {
            result = hub::server::serve(self.hub.clone(), addr) => result,
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                println!("Shutting down status hub");
                Ok(())
            }
        }
    }

    // ========== Mod Commands ==========

    pub async fn cmd_install(
        &self,
        mod_id: &str,
        revision_id: Option<&str>,
        install_deps: bool,
    ) -> Result<()> {
        println!("Installing mod {}", mod_id);
        self.follow_run(mod_id, |tasks| {
            tasks.start_install(mod_id, revision_id, install_deps)
        })
        .await?;

        if let Some((_, revision)) = self.db.installed_revision(mod_id)? {
            println!("Installed {} revision {}", mod_id, revision.name);
        }
        Ok(())
    }

    pub async fn cmd_uninstall(&self, mod_id: &str) -> Result<()> {
        println!("Uninstalling mod {}", mod_id);
        self.follow_run(mod_id, |tasks| tasks.start_uninstall(mod_id))
            .await?;
        println!("Uninstalled {}", mod_id);
        Ok(())
    }

    pub async fn cmd_status(&self, mod_id: &str) -> Result<()> {
        let snapshot = self.db.status_snapshot(mod_id)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize status")?
        );
        Ok(())
    }

    pub async fn cmd_installed(&self) -> Result<()> {
        let mods = self.db.installed_mods()?;
        if mods.is_empty() {
            println!("No mods installed.");
            return Ok(());
        }

        println!("Installed Mods:");
        println!("{:-<60}", "");
        for (i, m) in mods.iter().enumerate() {
            let name = m.name.as_deref().unwrap_or(&m.id);
            match self.db.installed_revision(&m.id)? {
                Some((installed, revision)) => {
                    println!(
                        "{:>3}. {} ({}) revision {} [{}]",
                        i + 1,
                        name,
                        m.id,
                        revision.name,
                        installed.status.as_str()
                    );
                    if let Some(path) = installed.path.as_deref().filter(|p| !p.is_empty()) {
                        println!("     Path: {}", path);
                    }
                }
                None => println!("{:>3}. {} ({})", i + 1, name, m.id),
            }
        }
        Ok(())
    }

    pub async fn cmd_star(&self, mod_id: &str, starred: bool) -> Result<()> {
        self.db.set_starred(mod_id, starred)?;
        if starred {
            println!("Starred {}", mod_id);
        } else {
            println!("Unstarred {}", mod_id);
        }
        Ok(())
    }

    // ========== Playlist Commands ==========

    pub async fn cmd_playlist_create(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Playlist name cannot be empty");
        }
        let id = self.db.create_playlist(name)?;
        println!("Created playlist '{}' (id {})", name, id);
        Ok(())
    }

    pub async fn cmd_playlist_list(&self) -> Result<()> {
        let playlists = self.db.list_playlists()?;
        if playlists.is_empty() {
            println!("No playlists. Create one with 'smods playlist create <name>'.");
            return Ok(());
        }

        println!("Playlists:");
        println!("{:-<40}", "");
        for p in playlists {
            println!("{:>4}  {}", p.id, p.name);
        }
        Ok(())
    }

    pub async fn cmd_playlist_add(&self, playlist_id: i64, mod_id: &str) -> Result<()> {
        self.db.add_to_playlist(mod_id, playlist_id)?;
        println!("Added {} to playlist {}", mod_id, playlist_id);
        Ok(())
    }

    pub async fn cmd_playlist_remove(&self, playlist_id: i64, mod_id: &str) -> Result<()> {
        if self.db.remove_from_playlist(mod_id, playlist_id)? {
            println!("Removed {} from playlist {}", mod_id, playlist_id);
        } else {
            println!("{} is not in playlist {}", mod_id, playlist_id);
        }
        Ok(())
    }

    // ========== Config Commands ==========

    pub async fn cmd_config_show(&self) -> Result<()> {
        let config = self.config.read().await;
        let unset = "(not set)";

        println!("Configuration");
        println!("{:-<60}", "");
        println!("Config file:      {}", config.paths.config_file().display());
        println!("Database:         {}", config.paths.database_file().display());
        println!(
            "Install dir:      {}",
            config.game.install_dir.as_deref().unwrap_or(unset)
        );
        println!(
            "Data dir:         {}",
            config.game.data_dir.as_deref().unwrap_or(unset)
        );
        println!("Downloads dir:    {}", config.downloads_dir().display());
        println!("Catalogue:        {}", config.catalogue.base_url);
        println!("Hub:              {}:{}", config.hub.address, config.hub.port);
        println!(
            "Manual download:  wait {}s, open browser: {}",
            config.manual_download_timeout_secs, config.open_browser_on_auth_denied
        );
        if config.install_roots().is_none() {
            println!();
            println!("Install and data folders must both be set before installing.");
            println!("Use 'smods config set-paths --install-dir <dir> --data-dir <dir>'.");
        }
        Ok(())
    }

    pub async fn cmd_config_set_paths(
        &self,
        install_dir: Option<&str>,
        data_dir: Option<&str>,
    ) -> Result<()> {
        if install_dir.is_none() && data_dir.is_none() {
            bail!("Nothing to set. Pass --install-dir and/or --data-dir.");
        }
        self.set_install_paths(install_dir, data_dir).await?;

        let config = self.config.read().await;
        match config.install_roots() {
            Some(roots) => println!(
                "Install dir: {}\nData dir:    {}",
                roots.install_dir.display(),
                roots.data_dir.display()
            ),
            None => println!("Saved. Both folders are required before installing."),
        }
        Ok(())
    }

    pub async fn cmd_config_set_downloads_dir(&self, path: &str) -> Result<()> {
        self.set_downloads_dir_override(Some(path)).await?;
        let dir = self.config.read().await.downloads_dir();
        println!("Downloads dir: {}", dir.display());
        Ok(())
    }

    /// Start a run and render its hub traffic until it finishes
    async fn follow_run(
        &self,
        channel: &str,
        start: impl FnOnce(&ModTasks) -> JoinHandle<Result<()>>,
    ) -> Result<()> {
        let (listener, mut events) = self.hub.register();
        let forwarder = self.connect_forwarder().await;
        let mut view = ProgressView::new(channel);

        let mut handle = start(&self.tasks);
        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                Some(raw) = events.recv() => view.handle(&raw),
            }
        };

        // Messages published just before the run returned
        while let Ok(raw) = events.try_recv() {
            view.handle(&raw);
        }
        view.finish();
        self.hub.unregister(listener);

        if let Some(forwarder) = forwarder {
            if tokio::time::timeout(FORWARDER_FLUSH_TIMEOUT, forwarder.finish())
                .await
                .is_err()
            {
                tracing::warn!("Timed out flushing status to the hub server");
            }
        }

        joined.context("Task panicked")?
    }

    /// Mirror this run's status to a running `smods serve`, if there is one
    async fn connect_forwarder(&self) -> Option<Forwarder> {
        let addr = match self.config.read().await.hub.socket_addr() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::debug!("Not forwarding status: {:#}", e);
                return None;
            }
        };

        match hub::client::forward_to(self.hub.clone(), &format!("ws://{}", addr)).await {
            Ok(forwarder) => Some(forwarder),
            Err(e) => {
                tracing::debug!("No hub server to forward to: {:#}", e);
                None
            }
        }
    }
}
