//! Install pipeline

use super::report::Reporter;
use super::{Compensation, InstallError, ModTarget, ModTasks, Scope, UnitOfWork};
use crate::catalogue::{ModInfo, RevisionInfo};
use crate::config::InstallRoots;
use crate::db::{ConflictError, InstallStatus, ModRecord, RevisionRecord};
use crate::download::{
    await_manual_download, copy_tree, extract_archive, ErrorCallback, FetchOutcome,
    ProgressCallback, UrlResolution,
};
use crate::status::{OpKind, OpState};
use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::json;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Smallest download progress step worth publishing
const MIN_PROGRESS_STEP: u64 = 256 * 1024;

/// An archive ready to unzip, plus the bookkeeping it still needs
struct ObtainedArchive {
    path: PathBuf,
    /// A cached entry pointed at a file that no longer exists
    stale_entry: bool,
    /// Downloaded by this run, to be recorded as a downloaded revision
    fresh: bool,
}

impl ObtainedArchive {
    fn cached(path: PathBuf) -> Self {
        Self {
            path,
            stale_entry: false,
            fresh: false,
        }
    }
}

type InstallResult<T> = std::result::Result<T, InstallError>;

impl ModTasks {
    /// Install a mod and wait for the run to finish
    pub async fn install(
        &self,
        mod_id: &str,
        revision_id: Option<&str>,
        install_deps: bool,
    ) -> Result<()> {
        let session = self.db.session()?;
        let mut uow = UnitOfWork::new(session);

        self.run_install(
            &mut uow,
            ModTarget::Id(mod_id.to_string()),
            revision_id.map(str::to_string),
            install_deps,
            Scope::TopLevel,
        )
        .await?;
        Ok(())
    }

    /// One install run. Dependencies re-enter here with `Scope::Dependency`.
    pub(crate) fn run_install<'a>(
        &'a self,
        uow: &'a mut UnitOfWork,
        target: ModTarget,
        revision_id: Option<String>,
        install_deps: bool,
        scope: Scope,
    ) -> BoxFuture<'a, InstallResult<()>> {
        async move {
            let mod_id = target.id().to_string();
            tracing::info!(
                "Installing revision {} of mod {} ({:?})",
                revision_id.as_deref().unwrap_or("latest"),
                mod_id,
                scope
            );

            let result = if uow.enter(&mod_id) {
                let mut reporter = Reporter::new(
                    self.hub.clone(),
                    self.db.clone(),
                    &mod_id,
                    OpKind::Install,
                );
                reporter.mark_installing();

                let mut compensation = Compensation::None;
                let steps = self
                    .install_steps(
                        uow,
                        &target,
                        revision_id.as_deref(),
                        install_deps,
                        &mut reporter,
                        &mut compensation,
                    )
                    .await;

                uow.leave(&mod_id);
                match steps {
                    Ok(()) => Ok(()),
                    Err(err) => Err(self.fail_install(uow, &mut reporter, &compensation, err)),
                }
            } else {
                tracing::warn!("Mod {} is already being installed in this run", mod_id);
                Err(InstallError::DependencyCycle { mod_id })
            };

            if scope.is_top_level() {
                uow.close();
            }
            result
        }
        .boxed()
    }

    /// Undo what the run committed, then report the failure
    fn fail_install(
        &self,
        uow: &mut UnitOfWork,
        reporter: &mut Reporter,
        compensation: &Compensation,
        err: InstallError,
    ) -> InstallError {
        if err.is_classified() {
            tracing::warn!("Install stopped: {}", err);
        } else {
            tracing::error!("An error has occurred during install: {:#}", err);
        }

        if let Err(e) = compensation.apply(&mut uow.session) {
            tracing::error!("Rollback failed: {:#}", e);
        }

        reporter.refresh();
        reporter.error(&err);
        err
    }

    async fn install_steps(
        &self,
        uow: &mut UnitOfWork,
        target: &ModTarget,
        revision_id: Option<&str>,
        install_deps: bool,
        reporter: &mut Reporter,
        compensation: &mut Compensation,
    ) -> InstallResult<()> {
        let mod_id = target.id();
        if let Some(info) = target.resolved() {
            reporter.set_mod(info);
        }

        let Some(roots) = self.settings.roots.clone() else {
            return Err(InstallError::NoPathConfiguration);
        };

        // Step 1: mod and revision metadata
        reporter.send(OpState::GetModInfo);
        let mod_info = match target.resolved() {
            Some(info) => info.clone(),
            None => self.catalogue.base_mod(mod_id).await?,
        };
        reporter.set_mod(&mod_info);

        let revision = self.select_revision(&mod_info, revision_id).await?;
        reporter.set_revision(&revision);
        tracing::info!("Mod name: {} - Revision: {}", mod_info.name, revision.name);

        let (db_mod, _) = uow.session.get_or_create_mod(&mod_info.id, &mod_info.name)?;
        if let Some(installed) = uow.session.installed_revision(&db_mod.id)? {
            if installed.revision_id != revision.id {
                return Err(self.already_installed(uow, &installed.revision_id)?);
            }
        }
        let (db_revision, _) = uow.session.get_or_create_revision(&revision, &db_mod)?;

        if let Err(e) =
            uow.session
                .set_installed(&db_mod, &db_revision, InstallStatus::Installing, None)
        {
            let conflict = e
                .downcast_ref::<ConflictError>()
                .map(|c| c.installed_revision_id.clone());
            return Err(match conflict {
                Some(revision_id) => self.already_installed(uow, &revision_id)?,
                None => InstallError::Other(e),
            });
        }

        // First checkpoint
        uow.session.commit()?;
        *compensation = Compensation::RemoveInstalled {
            mod_id: db_mod.id.clone(),
        };
        reporter.refresh();

        // Step 2: dependencies
        let dependency_ids = if install_deps && mod_info.has_dependencies {
            self.install_dependencies(uow, &mod_info, &revision, reporter)
                .await?
        } else {
            tracing::debug!("Skipping dependencies of {}", mod_info.id);
            Vec::new()
        };

        // Step 3: download
        reporter.send(OpState::GetDownloadUrl);
        let obtained = self
            .obtain_archive(uow, &db_mod, &db_revision, &revision, reporter)
            .await?;
        let archive = obtained.path.clone();

        // Step 4: unzip into a private folder, removed when `staging` drops
        reporter.send(OpState::Unzip);
        let staging = tempfile::Builder::new()
            .prefix("smods_manager-")
            .tempdir()
            .context("Failed to create temporary folder")?;
        let extracted = {
            let archive = archive.clone();
            let dest = staging.path().to_path_buf();
            tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
                .await
                .context("Extraction task failed")??
        };
        tracing::info!("Unzipped {} to {}", archive.display(), staging.path().display());

        // Step 5: copy into the game folders
        reporter.send(OpState::Copying);
        let installed_path = self
            .copy_into_place(&roots, &mod_info, staging.path().to_path_buf(), &extracted, reporter)
            .await?;

        // Final checkpoint. Nothing may be staged during the download or copy.
        for dep_id in &dependency_ids {
            uow.session.add_dependency(&mod_info.id, dep_id)?;
        }
        if obtained.stale_entry {
            uow.session.delete_downloaded(&db_mod.id, &db_revision.id)?;
        }
        if obtained.fresh {
            uow.session
                .add_downloaded(&db_mod, &db_revision, &archive.to_string_lossy())?;
        }
        let path = installed_path.to_string_lossy().to_string();
        uow.session
            .set_installed(&db_mod, &db_revision, InstallStatus::Installed, Some(&path))?;
        uow.session.commit()?;
        tracing::info!("Revision {} installed at {}", revision.id, path);

        reporter.refresh();
        reporter.send(OpState::Done);
        Ok(())
    }

    /// Pick the requested revision, defaulting to the latest one
    async fn select_revision(
        &self,
        mod_info: &ModInfo,
        revision_id: Option<&str>,
    ) -> InstallResult<RevisionInfo> {
        let wanted = match revision_id.map(str::trim) {
            None | Some("") => return Ok(mod_info.latest_revision.clone()),
            Some(id) if id == mod_info.latest_revision.id => {
                return Ok(mod_info.latest_revision.clone())
            }
            Some(id) => id,
        };

        let (latest, others) = self.catalogue.mod_revisions(&mod_info.id).await?;
        others
            .into_iter()
            .chain(std::iter::once(latest))
            .find(|r| r.id == wanted)
            .ok_or_else(|| InstallError::RevisionNotFound {
                revision_id: wanted.to_string(),
            })
    }

    fn already_installed(&self, uow: &UnitOfWork, revision_id: &str) -> InstallResult<InstallError> {
        let installed = uow
            .session
            .revision(revision_id)?
            .with_context(|| format!("Installed revision {} has no record", revision_id))?;
        Ok(InstallError::ModAlreadyInstalled {
            installed: installed.to_info(),
        })
    }

    async fn install_dependencies(
        &self,
        uow: &mut UnitOfWork,
        mod_info: &ModInfo,
        revision: &RevisionInfo,
        reporter: &Reporter,
    ) -> InstallResult<Vec<String>> {
        reporter.send(OpState::GetDependencies);

        let deps = self.catalogue.dependency_tree(&mod_info.id).await?;
        tracing::info!("{} dependencies found for {}", deps.len(), mod_info.id);

        let installed: HashSet<String> = uow
            .session
            .find_installed_mods()?
            .into_iter()
            .map(|m| m.id)
            .filter(|id| *id != mod_info.id)
            .collect();

        let mut linked = Vec::with_capacity(deps.len());
        for dep in deps {
            let dep_id = dep.id.clone();
            if installed.contains(&dep_id) {
                tracing::debug!("Dependency {} already installed", dep_id);
                linked.push(dep_id);
                continue;
            }

            tracing::info!("Installing dependency {} of {}", dep.name, mod_info.name);
            reporter.send_about(OpState::InstallingDependency, &dep, &dep.latest_revision);

            let dep_revision = dep.latest_revision.id.clone();
            self.run_install(
                uow,
                ModTarget::Resolved(dep),
                Some(dep_revision),
                false,
                Scope::Dependency,
            )
            .await
            .map_err(|e| match e {
                InstallError::DependencyCycle { .. } => e,
                other => InstallError::Dependency {
                    mod_id: dep_id.clone(),
                    source: Box::new(other),
                },
            })?;

            linked.push(dep_id);
        }

        tracing::info!("Dependencies of {} ready, continuing with {}", mod_info.id, revision.id);
        Ok(linked)
    }

    /// Reuse a cached archive or download a fresh one.
    ///
    /// Only reads the session. The download bookkeeping is returned for the
    /// caller to stage at its final checkpoint.
    async fn obtain_archive(
        &self,
        uow: &mut UnitOfWork,
        db_mod: &ModRecord,
        db_revision: &RevisionRecord,
        revision: &RevisionInfo,
        reporter: &Reporter,
    ) -> InstallResult<ObtainedArchive> {
        let mut stale_entry = false;
        if let Some(cached) = uow.session.downloaded_revision(&db_mod.id, &db_revision.id)? {
            let path = PathBuf::from(&cached.path);
            if path.is_file() {
                tracing::info!("Revision already downloaded at {}", path.display());
                return Ok(ObtainedArchive::cached(path));
            }
            tracing::warn!(
                "Downloaded archive {} is missing, downloading it again",
                path.display()
            );
            stale_entry = true;
        }

        let url = match self.source.resolve_url(revision).await? {
            UrlResolution::Url(url) => url,
            UrlResolution::AuthDenied => {
                let path = self.wait_for_manual_download(revision, reporter).await?;
                return Ok(ObtainedArchive {
                    path,
                    stale_entry,
                    fresh: false,
                });
            }
            UrlResolution::HttpError(status) => {
                return Err(InstallError::Http {
                    stage: "get_download_url",
                    status,
                })
            }
        };
        tracing::info!("Download url: {}", url);

        let outcome = self
            .source
            .fetch(
                &url,
                &self.settings.downloads_dir,
                download_progress(reporter.clone()),
                download_error(),
            )
            .await?;

        match outcome {
            FetchOutcome::File(path) => {
                tracing::info!("File downloaded to {}", path.display());
                Ok(ObtainedArchive {
                    path,
                    stale_entry,
                    fresh: true,
                })
            }
            FetchOutcome::AuthDenied => {
                let path = self.wait_for_manual_download(revision, reporter).await?;
                Ok(ObtainedArchive {
                    path,
                    stale_entry,
                    fresh: false,
                })
            }
            FetchOutcome::HttpError(status) => Err(InstallError::Http {
                stage: "downloading",
                status,
            }),
        }
    }

    async fn wait_for_manual_download(
        &self,
        revision: &RevisionInfo,
        reporter: &Reporter,
    ) -> InstallResult<PathBuf> {
        tracing::info!("Server refused the download, waiting for a manual download");

        if self.settings.open_browser_on_auth_denied {
            if let Err(e) = open::that(&revision.download_url) {
                tracing::warn!("Failed to open browser: {}", e);
            }
        }

        let downloads_dir = &self.settings.downloads_dir;
        let timeout = self.settings.manual_download_timeout;
        reporter.send_with(
            OpState::WaitForFile,
            json!({
                "timeout": timeout.as_secs(),
                "download_folder": downloads_dir.to_string_lossy(),
            }),
        );

        let expected = downloads_dir.join(&revision.filename);
        Ok(await_manual_download(&expected, timeout).await?)
    }

    async fn copy_into_place(
        &self,
        roots: &InstallRoots,
        mod_info: &ModInfo,
        staging: PathBuf,
        extracted: &Path,
        reporter: &Reporter,
    ) -> InstallResult<PathBuf> {
        let target = roots.target_folder(&mod_info.category);
        // Progress and the recorded path both follow the archive's root
        let root_name = extracted
            .file_name()
            .context("Extracted archive has no root folder")?
            .to_os_string();
        tracing::info!("Target folder: {}", target.display());

        let progress_reporter = reporter.clone();
        let dest = target.clone();
        let copy_root = root_name.clone();
        tokio::task::spawn_blocking(move || {
            let progress = move |copied: u64, total: u64| -> Result<()> {
                progress_reporter.send_with(
                    OpState::Copying,
                    json!({ "copied_bytes": copied, "total_bytes": total }),
                );
                Ok(())
            };
            copy_tree(&staging, &dest, Some(Path::new(&copy_root)), Some(&progress))
        })
        .await
        .context("Copy task failed")??;

        Ok(target.join(root_name))
    }
}

fn download_progress(reporter: Reporter) -> ProgressCallback {
    let last_sent = AtomicU64::new(0);
    Arc::new(move |downloaded, total| {
        let step = (total / 100).max(MIN_PROGRESS_STEP);
        let previous = last_sent.load(Ordering::Relaxed);
        let finished = total > 0 && downloaded >= total;
        if !finished && downloaded.saturating_sub(previous) < step {
            return;
        }
        last_sent.store(downloaded, Ordering::Relaxed);

        reporter.send_with(
            OpState::Downloading,
            json!({ "downloaded_bytes": downloaded, "total_bytes": total }),
        );
    })
}

fn download_error() -> ErrorCallback {
    Arc::new(|code, message| {
        tracing::error!("Download stopped with error {}: {}", code, message);
    })
}
