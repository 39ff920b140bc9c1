//! Uninstall pipeline

use super::report::Reporter;
use super::{InstallError, ModTasks};
use crate::db::Session;
use crate::download::remove_tree;
use crate::status::{OpKind, OpState};
use anyhow::{Context, Result};
use std::path::PathBuf;

impl ModTasks {
    /// Uninstall a mod and wait for the run to finish
    pub async fn uninstall(&self, mod_id: &str) -> Result<()> {
        tracing::info!("Uninstalling mod {}", mod_id);

        let mut session = self.db.session()?;
        let mut reporter = Reporter::new(
            self.hub.clone(),
            self.db.clone(),
            mod_id,
            OpKind::Uninstall,
        );

        let result = self.uninstall_steps(&mut session, &mut reporter, mod_id).await;

        if let Err(err) = &result {
            if err.is_classified() {
                tracing::warn!("Uninstall stopped: {}", err);
            } else {
                tracing::error!("An error has occurred during uninstall: {:#}", err);
            }
            if let Err(e) = session.rollback() {
                tracing::error!("Rollback failed: {:#}", e);
            }
            reporter.refresh();
            reporter.error(err);
        }

        tracing::debug!("Closing uninstall session for {}", mod_id);
        drop(session);
        result.map_err(Into::into)
    }

    async fn uninstall_steps(
        &self,
        session: &mut Session,
        reporter: &mut Reporter,
        mod_id: &str,
    ) -> std::result::Result<(), InstallError> {
        reporter.send(OpState::GetModInfo);

        if session.get_mod(mod_id)?.is_none() {
            return Err(InstallError::ModNotFound(mod_id.to_string()));
        }
        let Some(installed) = session.installed_revision(mod_id)? else {
            return Err(InstallError::ModNotInstalled(mod_id.to_string()));
        };

        // Step 1: remove the installed folder
        reporter.send(OpState::RemoveFolder);
        if let Some(path) = installed.path.filter(|p| !p.is_empty()) {
            tracing::info!("Deleting the install path: {}", path);
            let path = PathBuf::from(path);
            let left = tokio::task::spawn_blocking(move || remove_tree(&path))
                .await
                .context("Remove task failed")?;
            if left > 0 {
                tracing::warn!("{} entries could not be removed", left);
            }
        }

        // Step 2: remove the installed revision row
        reporter.send(OpState::RemoveDatabaseEntry);
        session.delete_installed(mod_id)?;
        session.commit()?;

        reporter.refresh();
        reporter.send(OpState::Done);
        tracing::info!("Uninstall of {} completed", mod_id);
        Ok(())
    }
}
