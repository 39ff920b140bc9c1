//! Install and uninstall orchestration
//!
//! Each run is spawned on its own tokio task and reports progress only
//! through the status hub. An install walks
//! `get_mod_info → [dependencies] → get_download_url → downloading|wait_for_file
//! → unzip → copying → done`, with `error` reachable from every step.
//!
//! A run writes through one [`UnitOfWork`]. Dependencies are installed
//! recursively on the same task and share the parent's unit of work; only the
//! top-level call closes it.

mod compensation;
mod error;
mod install;
mod report;
mod uninstall;

#[cfg(test)]
mod tests;

pub use compensation::Compensation;
pub use error::InstallError;

use crate::catalogue::{Catalogue, ModInfo};
use crate::config::TaskSettings;
use crate::db::{Database, Session};
use crate::download::DownloadSource;
use crate::hub::Hub;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A mod to install, either by catalogue id or with metadata already fetched
#[derive(Debug, Clone, PartialEq)]
pub enum ModTarget {
    Id(String),
    Resolved(ModInfo),
}

impl ModTarget {
    pub fn id(&self) -> &str {
        match self {
            ModTarget::Id(id) => id,
            ModTarget::Resolved(info) => &info.id,
        }
    }

    pub fn resolved(&self) -> Option<&ModInfo> {
        match self {
            ModTarget::Id(_) => None,
            ModTarget::Resolved(info) => Some(info),
        }
    }
}

/// Whether a run was triggered directly or as a dependency of another run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    TopLevel,
    Dependency,
}

impl Scope {
    pub fn is_top_level(&self) -> bool {
        matches!(self, Scope::TopLevel)
    }
}

/// Run-scoped persistence state shared by a top-level install and all of
/// its dependency installs
pub struct UnitOfWork {
    pub session: Session,
    in_progress: HashSet<String>,
    closed: bool,
}

impl UnitOfWork {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            in_progress: HashSet::new(),
            closed: false,
        }
    }

    /// Mark a mod as being installed. Returns false if it already is.
    fn enter(&mut self, mod_id: &str) -> bool {
        self.in_progress.insert(mod_id.to_string())
    }

    fn leave(&mut self, mod_id: &str) {
        self.in_progress.remove(mod_id);
    }

    /// Discard anything left uncommitted and stop accepting work
    fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.session.rollback() {
            tracing::warn!("Failed to release unit of work: {:#}", e);
        }
        self.in_progress.clear();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Entry point for install and uninstall runs
#[derive(Clone)]
pub struct ModTasks {
    db: Arc<Database>,
    hub: Arc<Hub>,
    catalogue: Arc<dyn Catalogue>,
    source: Arc<dyn DownloadSource>,
    settings: TaskSettings,
}

impl ModTasks {
    pub fn new(
        db: Arc<Database>,
        hub: Arc<Hub>,
        catalogue: Arc<dyn Catalogue>,
        source: Arc<dyn DownloadSource>,
        settings: TaskSettings,
    ) -> Self {
        Self {
            db,
            hub,
            catalogue,
            source,
            settings,
        }
    }

    /// Spawn an install run. Progress is published on the mod's hub channel.
    pub fn start_install(
        &self,
        mod_id: &str,
        revision_id: Option<&str>,
        install_deps: bool,
    ) -> JoinHandle<Result<()>> {
        let tasks = self.clone();
        let mod_id = mod_id.to_string();
        let revision_id = revision_id.map(str::to_string);

        tokio::spawn(async move {
            let result = tasks
                .install(&mod_id, revision_id.as_deref(), install_deps)
                .await;
            if let Err(e) = &result {
                tracing::error!("Install of {} failed: {:#}", mod_id, e);
            }
            result
        })
    }

    /// Spawn an uninstall run
    pub fn start_uninstall(&self, mod_id: &str) -> JoinHandle<Result<()>> {
        let tasks = self.clone();
        let mod_id = mod_id.to_string();

        tokio::spawn(async move {
            let result = tasks.uninstall(&mod_id).await;
            if let Err(e) = &result {
                tracing::error!("Uninstall of {} failed: {:#}", mod_id, e);
            }
            result
        })
    }
}
